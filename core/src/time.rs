//! small time & address-family utilities shared by the ICMP engine, the
//! NDT7 session machine and the statistics aggregators

use std::net::IpAddr;

/// classify an address by IP version, for per-family metrics and
/// per-version statistics grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpVersion {
    /// IPv4 address
    V4,
    /// IPv6 address
    V6,
}

impl IpVersion {
    /// classify an [`IpAddr`]
    pub fn of(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }
}

impl std::fmt::Display for IpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            IpVersion::V4 => "v4",
            IpVersion::V6 => "v6",
        })
    }
}

/// seconds since the Unix epoch, as an `f64` with sub-second precision;
/// used only for logging/serialization -- `Instant` remains the source
/// of truth for elapsed-time computation
pub fn wall_clock_secs() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// the current instant in RFC3339, for use in index-log documents
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// sample an exponential-distribution draw with the given mean using
/// inverse-CDF sampling, clamped to `[min, max]`. Used by `ndt7 monitor`
/// to jitter the sleep between runs without pulling in a distribution
/// crate.
pub fn jittered_interval(mean: std::time::Duration, min: std::time::Duration, max: std::time::Duration) -> std::time::Duration {
    let u: f64 = loop {
        let u = rand::random::<f64>();
        if u > 0.0 {
            break u;
        }
    };
    let sample = -u.ln() * mean.as_secs_f64();
    std::time::Duration::from_secs_f64(sample.clamp(min.as_secs_f64(), max.as_secs_f64()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn ip_version_classifies() {
        assert_eq!(IpVersion::of("127.0.0.1".parse().unwrap()), IpVersion::V4);
        assert_eq!(IpVersion::of("::1".parse().unwrap()), IpVersion::V6);
    }

    #[test]
    fn jitter_is_clamped() {
        let mean = Duration::from_secs(10);
        let min = Duration::from_secs(1);
        let max = Duration::from_secs(25);
        for _ in 0..1000 {
            let d = jittered_interval(mean, min, max);
            assert!(d >= min && d <= max);
        }
    }
}
