//! process-wide logging configuration & duration parsing

/// default log level. Can use `--log-level` or the `NETKIT_LOG` env var
pub const DEFAULT_LOG_LEVEL: &str = "info";

use anyhow::{Context, Result};
use std::time::Duration;
use tracing_subscriber::{
    filter::EnvFilter,
    fmt,
    prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

/// log as "json" or "standard" (unstructured)
static DEFAULT_LOG_FORMAT: &str = "standard";

/// tracing subscriber configuration
#[derive(Debug)]
pub struct Trace {
    /// formatting to apply to logs
    pub log_fmt: String,
}

impl Trace {
    /// initialize the global tracing subscriber from a log-level string
    /// (e.g. `"info"`, `"debug,icmp_engine=trace"`). `NETKIT_LOG_FORMAT`
    /// selects `"json"` or `"standard"` output.
    pub fn init(log_level: &str) -> Result<Self> {
        let log_fmt: String =
            env_parser::parse_var_with_err("NETKIT_LOG_FORMAT", DEFAULT_LOG_FORMAT)?;

        let filter = EnvFilter::try_new(log_level)
            .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_LEVEL))?
            .add_directive("hyper=off".parse()?)
            .add_directive("reqwest=off".parse()?);

        match &log_fmt[..] {
            "json" => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().json())
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().with_target(false))
                    .init();
            }
        }

        Ok(Self { log_fmt })
    }
}

/// Parse a human duration string (`"3s"`, `"500ms"`, `"6h"`, or a bare
/// number of seconds like `"3"`) into a [`Duration`].
///
/// Recognized suffixes: `ms`, `s`, `m`, `h`. No suffix is treated as
/// seconds (fractional seconds are accepted, e.g. `"0.2"`).
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let (num, unit) = match s.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => (&s[..idx], &s[idx..]),
        None => (s, ""),
    };
    let num: f64 = num
        .parse()
        .with_context(|| format!("invalid duration `{s}`"))?;
    let secs = match unit {
        "" | "s" => num,
        "ms" => num / 1_000.0,
        "m" => num * 60.0,
        "h" => num * 3_600.0,
        other => anyhow::bail!("unrecognized duration unit `{other}` in `{s}`"),
    };
    if secs < 0.0 || !secs.is_finite() {
        anyhow::bail!("duration `{s}` must be a finite, non-negative number");
    }
    Ok(Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_suffixed_durations() {
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("6h").unwrap(), Duration::from_secs(6 * 3600));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
    }

    #[test]
    fn bare_number_is_seconds() {
        assert_eq!(parse_duration("0.2").unwrap(), Duration::from_millis(200));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("-1s").is_err());
    }
}
