//! command-line surface: two subcommands, `ping` and `ndt7`, each
//! following the teacher's `clap` derive + env-fallback convention

use std::time::Duration;

use clap::{Parser, Subcommand};
use url::Url;

fn duration_value_parser(s: &str) -> Result<Duration, String> {
    netkit_core::config::parse_duration(s).map_err(|e| e.to_string())
}

/// ICMP ping and NDT7 throughput testing in one binary
#[derive(Parser, Debug, Clone)]
#[clap(author, name = "netkit", bin_name = "netkit", about, long_about = None)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Command,
    /// set the log level; all valid `tracing`/`RUST_LOG` filters are accepted
    #[clap(long, env = "NETKIT_LOG", global = true, default_value = netkit_core::config::DEFAULT_LOG_LEVEL)]
    pub log_level: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// ICMP ping one or more hosts, reporting loss and latency
    Ping(PingArgs),
    /// NDT7 throughput testing: run once, monitor continuously, or serve
    Ndt7(Ndt7Args),
}

/// `ping HOST... [-c COUNT] [-T TIME] [-W WINDOW] [-i INTERVAL]
/// [--timeout SEC] [-f|--flood] [-a|--audible] [-q|--quiet]
/// [--show-ips] [--elastic URL]`
#[derive(Parser, Debug, Clone)]
pub struct PingArgs {
    /// hostnames, literal addresses, or pseudo-hosts (`faang`, `speedtest`)
    #[clap(required = true)]
    pub hosts: Vec<String>,
    /// probes to send to each host (unset: runs until Ctrl-C or --time elapses)
    #[clap(short = 'c', long, env = "NETKIT_PING_COUNT")]
    pub count: Option<u64>,
    /// total wall-clock time to run for
    #[clap(short = 'T', long = "time", env = "NETKIT_PING_TIME", value_parser = duration_value_parser)]
    pub time: Option<Duration>,
    /// statistics window: only probes completed within this long ago count
    /// toward the summary (default: unbounded, or 5s if neither --count nor
    /// --time is given)
    #[clap(short = 'W', long = "window", env = "NETKIT_PING_WINDOW", value_parser = duration_value_parser)]
    pub window: Option<Duration>,
    /// interval between probes to the same host (default: 5ms flood, else
    /// 250ms divided by the number of hosts)
    #[clap(short = 'i', long = "interval", env = "NETKIT_PING_INTERVAL", value_parser = duration_value_parser)]
    pub interval: Option<Duration>,
    /// per-probe timeout
    #[clap(long, env = "NETKIT_PING_TIMEOUT", value_parser = duration_value_parser, default_value = "1s")]
    pub timeout: Duration,
    /// send as fast as possible (5ms default interval instead of 250ms)
    #[clap(short, long)]
    pub flood: bool,
    /// ring the terminal bell on every successful reply
    #[clap(short, long)]
    pub audible: bool,
    /// suppress per-probe output; print only the final summary
    #[clap(short, long)]
    pub quiet: bool,
    /// print resolved IP addresses alongside hostnames
    #[clap(long = "show-ips")]
    pub show_ips: bool,
    /// index-log endpoint to additionally POST each probe outcome to
    #[clap(long, env = "NETKIT_ELASTIC_URL")]
    pub elastic: Option<Url>,
}

/// `ndt7 run|monitor|server`
#[derive(Parser, Debug, Clone)]
pub struct Ndt7Args {
    #[clap(subcommand)]
    pub command: Ndt7Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Ndt7Command {
    /// run one download+upload test against a server and print a summary
    Run(Ndt7RunArgs),
    /// repeat `run` indefinitely, with a jittered sleep between runs
    Monitor(Ndt7MonitorArgs),
    /// serve the NDT7 download/upload endpoints
    Server(Ndt7ServerArgs),
}

/// `ndt7 run [URL] [-W WINDOW] [--elastic URL]`
#[derive(Parser, Debug, Clone)]
pub struct Ndt7RunArgs {
    /// base HTTP(S) URL of the measurement server; omit to discover the
    /// nearest one via the locate service
    pub url: Option<Url>,
    /// sliding window over which throughput deltas/rates are computed
    #[clap(short = 'W', long = "window", env = "NETKIT_NDT7_WINDOW", value_parser = duration_value_parser, default_value = "3s")]
    pub window: Duration,
    /// index-log endpoint the final summary document is additionally posted to
    #[clap(long, env = "NETKIT_ELASTIC_URL")]
    pub elastic: Option<Url>,
    /// skip the ping warm-up pass against the server host
    #[clap(long)]
    pub no_warmup: bool,
}

/// `ndt7 monitor [URL] [-W WINDOW] [--period DURATION] [--elastic URL]`
#[derive(Parser, Debug, Clone)]
pub struct Ndt7MonitorArgs {
    /// base HTTP(S) URL of the measurement server; omit to discover the
    /// nearest one via the locate service on every run
    pub url: Option<Url>,
    #[clap(short = 'W', long = "window", env = "NETKIT_NDT7_WINDOW", value_parser = duration_value_parser, default_value = "3s")]
    pub window: Duration,
    /// mean interval between runs; the actual sleep is drawn from an
    /// exponential distribution with this mean, clamped to [0.1, 2.5] * period
    #[clap(long, env = "NETKIT_NDT7_PERIOD", value_parser = duration_value_parser, default_value = "1h")]
    pub period: Duration,
    #[clap(long, env = "NETKIT_ELASTIC_URL")]
    pub elastic: Option<Url>,
    #[clap(long)]
    pub no_warmup: bool,
}

/// `ndt7 server [URL] [-W WINDOW]`
#[derive(Parser, Debug, Clone)]
pub struct Ndt7ServerArgs {
    /// bind base, e.g. `ws://0.0.0.0:8080`
    #[clap(default_value = "ws://localhost:8080")]
    pub url: Url,
    #[clap(short = 'W', long = "window", env = "NETKIT_NDT7_WINDOW", value_parser = duration_value_parser, default_value = "3s")]
    pub window: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_parses_hosts_and_flags() {
        let cli = Cli::parse_from(["netkit", "ping", "example.com", "faang", "-c", "4", "-a", "-q"]);
        let Command::Ping(args) = cli.command else { panic!("expected ping") };
        assert_eq!(args.hosts, vec!["example.com", "faang"]);
        assert_eq!(args.count, Some(4));
        assert!(args.audible);
        assert!(args.quiet);
        assert!(!args.flood);
    }

    #[test]
    fn ndt7_run_parses_optional_url_and_window() {
        let cli = Cli::parse_from(["netkit", "ndt7", "run", "https://ndt.example.com", "-W", "5s"]);
        let Command::Ndt7(args) = cli.command else { panic!("expected ndt7") };
        let Ndt7Command::Run(run) = args.command else { panic!("expected run") };
        assert_eq!(run.url.unwrap().as_str(), "https://ndt.example.com/");
        assert_eq!(run.window, Duration::from_secs(5));
    }

    #[test]
    fn ndt7_server_defaults_to_localhost() {
        let cli = Cli::parse_from(["netkit", "ndt7", "server"]);
        let Command::Ndt7(args) = cli.command else { panic!("expected ndt7") };
        let Ndt7Command::Server(server) = args.command else { panic!("expected server") };
        assert_eq!(server.url.as_str(), "ws://localhost:8080/");
    }
}
