//! `ping` subcommand: resolves hosts, interleaves probes across them,
//! and reports a per-host and ungrouped summary

use std::io::Write;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use icmp_engine::{Engine, ProbeOutcome, Status};
use net_stats::GroupedPingStatistics;
use resolver::{Resolver, SystemResolver};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::cli::PingArgs;

/// expand pseudo-hosts (`faang`, `speedtest`) into their literal
/// constituents, in order, before resolution
async fn expand_hosts(hosts: &[String]) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for host in hosts {
        if host.eq_ignore_ascii_case("speedtest") {
            let servers = locate::nearest_servers(Duration::from_secs(10))
                .await
                .context("speedtest host discovery via the locate service failed")?;
            out.extend(servers.into_iter().take(10).map(|s| s.machine));
        } else {
            out.extend(resolver::expand_pseudo_host(host));
        }
    }
    Ok(out)
}

#[derive(Serialize)]
struct PingDocument {
    host: Option<String>,
    destination: String,
    status: String,
    elapsed_ms: Option<f64>,
    wall_clock: f64,
}

#[derive(Serialize)]
struct SummaryDocument<'a> {
    host: Option<&'a str>,
    probes_sent: u64,
    loss: Option<f64>,
    elapsed_mean: Option<f64>,
    elapsed_std: Option<f64>,
}

impl<'a> SummaryDocument<'a> {
    fn new(host: Option<&'a str>, probes_sent: u64, summary: &net_stats::Summary) -> Self {
        Self {
            host,
            probes_sent,
            loss: summary.loss(),
            elapsed_mean: summary.elapsed_mean,
            elapsed_std: summary.elapsed_std,
        }
    }
}

impl PingDocument {
    fn from_outcome(outcome: &ProbeOutcome) -> Self {
        Self {
            host: outcome.label.clone(),
            destination: outcome.destination.to_string(),
            status: outcome.status.to_string(),
            elapsed_ms: outcome.elapsed().map(|d| d.as_secs_f64() * 1000.0),
            wall_clock: outcome.wall_clock,
        }
    }
}

fn print_probe(outcome: &ProbeOutcome, show_ips: bool) {
    let host = outcome.label.as_deref().unwrap_or("?");
    let addr_suffix = if show_ips { format!(" ({})", outcome.destination) } else { String::new() };
    match outcome.status {
        Status::Success => {
            let ms = outcome.elapsed().map(|d| d.as_secs_f64() * 1000.0).unwrap_or(0.0);
            println!("reply from {host}{addr_suffix}: seq={} time={ms:.2} ms", outcome.seq_cnt);
        }
        Status::Timeout => println!("{host}{addr_suffix}: request timeout for seq={}", outcome.seq_cnt),
        Status::Unreachable => println!("{host}{addr_suffix}: destination unreachable, seq={}", outcome.seq_cnt),
        Status::Canceled => println!("{host}{addr_suffix}: probe cancelled, seq={}", outcome.seq_cnt),
        Status::Scheduled | Status::Pending => {}
    }
}

#[allow(clippy::too_many_arguments)]
async fn fire_probe(
    engine: Arc<Engine>,
    stats: GroupedPingStatistics<String>,
    index_log: Arc<sink::IndexLog>,
    timeout: Duration,
    destination: IpAddr,
    host: String,
    show_ips: bool,
    audible: bool,
    quiet: bool,
) {
    let outcome = engine.ping(destination, timeout, Some(host.clone())).await;
    if index_log.is_enabled() {
        index_log.log("pings", &PingDocument::from_outcome(&outcome));
    }
    if !quiet {
        print_probe(&outcome, show_ips);
    }
    if audible && outcome.status == Status::Success {
        print!("\x07");
        let _ = std::io::stdout().flush();
    }
    stats.ingest(host, outcome);
}

/// drive the `ping` subcommand to completion and print its summary
pub async fn run(args: PingArgs) -> Result<()> {
    let resolver = SystemResolver::new().context("failed to build DNS resolver")?;
    let hosts = expand_hosts(&args.hosts).await?;

    let mut resolved: Vec<(String, Vec<IpAddr>)> = Vec::new();
    for host in &hosts {
        match resolver.resolve(host).await {
            Ok(addrs) => resolved.push((host.clone(), addrs.into_iter().collect())),
            Err(err) => warn!(%host, %err, "failed to resolve host, skipping"),
        }
    }
    if resolved.is_empty() {
        anyhow::bail!("no hosts resolved");
    }
    let host_count = resolved.len();

    let interval = args.interval.unwrap_or_else(|| {
        let base = if args.flood { Duration::from_millis(5) } else { Duration::from_millis(250) };
        base / host_count as u32
    });

    let indefinite = args.count.is_none() && args.time.is_none();
    let window = args.window.or(if indefinite { Some(Duration::from_secs(5)) } else { None });

    let engine = Arc::new(Engine::new().context("failed to create ICMP engine")?);
    let stats: GroupedPingStatistics<String> = GroupedPingStatistics::new(window);
    let index_log = Arc::new(sink::IndexLog::new(args.elastic.clone()));

    let deadline = args.time.map(|t| Instant::now() + t);
    let total_probes = args.count.map(|c| c * host_count as u64);

    let mut cursors = vec![0usize; host_count];
    let mut sent: u64 = 0;
    let mut pending = JoinSet::new();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    'outer: loop {
        for i in 0..host_count {
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    break 'outer;
                }
            }
            if let Some(total) = total_probes {
                if sent >= total {
                    break 'outer;
                }
            }

            let (host, addrs) = &resolved[i];
            let addr = addrs[cursors[i] % addrs.len()];
            cursors[i] += 1;

            pending.spawn(fire_probe(
                engine.clone(),
                stats.clone(),
                index_log.clone(),
                args.timeout,
                addr,
                host.clone(),
                args.show_ips,
                args.audible,
                args.quiet,
            ));
            sent += 1;

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = &mut ctrl_c => break 'outer,
            }
        }
        if !indefinite && deadline.is_none() && total_probes.is_none() {
            break;
        }
    }

    while pending.join_next().await.is_some() {}

    let total = stats.total();
    let summary = total.summary();
    println!(
        "\n--- summary ({sent} probes sent, {host_count} host{s}) ---",
        s = if host_count == 1 { "" } else { "s" }
    );
    println!("loss: {}, rtt: {}", summary.loss_pretty(), summary.latency_pretty());
    if index_log.is_enabled() {
        index_log.log("ping_summary", &SummaryDocument::new(None, sent, &summary));
    }
    for (host, _) in &resolved {
        if let Some(host_summary) = stats.group(host) {
            info!(
                host,
                loss = host_summary.loss_pretty(),
                rtt = host_summary.latency_pretty(),
                "per-host summary"
            );
            println!("  {host}: loss: {}, rtt: {}", host_summary.loss_pretty(), host_summary.latency_pretty());
            if index_log.is_enabled() {
                let host_probes: u64 = host_summary.status_count.values().map(|&n| n.max(0) as u64).sum();
                index_log.log("ping_summary", &SummaryDocument::new(Some(host), host_probes, &host_summary));
            }
        }
    }
    index_log.drain().await;

    Ok(())
}
