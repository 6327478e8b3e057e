//! `ndt7 run`/`monitor`/`server`: NDT7 throughput testing orchestration

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use icmp_engine::Engine;
use net_stats::{GroupSummary, Ndt7Aggregator, PingStatistics};
use ndt7::{Client, MeasurementPair, Test};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cli::{Ndt7MonitorArgs, Ndt7RunArgs, Ndt7ServerArgs};

const TEST_DEADLINE: Duration = Duration::from_secs(15);
const WARMUP_PROBES: u64 = 20;
const WARMUP_INTERVAL: Duration = Duration::from_millis(50);

/// one resolved measurement server, however it was obtained: a
/// user-supplied base URL (both subtests derived from it) or a
/// locate-service result (each subtest has its own complete URL)
enum Target {
    BaseUrl(Url),
    Discovered(locate::Server),
}

impl Target {
    fn host(&self) -> Option<String> {
        match self {
            Target::BaseUrl(u) => u.host_str().map(str::to_string),
            Target::Discovered(s) => s.download_url.host_str().map(str::to_string),
        }
    }

    fn label(&self) -> String {
        match self {
            Target::BaseUrl(u) => u.to_string(),
            Target::Discovered(s) => s.machine.clone(),
        }
    }

    async fn test(&self, direction: Test, deadline: Duration) -> Result<mpsc::Receiver<MeasurementPair>> {
        match self {
            Target::BaseUrl(u) => Client::new(u.clone()).test(direction, deadline).await.map_err(Into::into),
            Target::Discovered(s) => {
                let url = match direction {
                    Test::Download => &s.download_url,
                    Test::Upload => &s.upload_url,
                };
                ndt7::run_at(url, direction, deadline).await.map_err(Into::into)
            }
        }
    }
}

async fn resolve_target(url: Option<Url>) -> Result<Target> {
    match url {
        Some(url) => Ok(Target::BaseUrl(url)),
        None => {
            let server = locate::nearest_server(Duration::from_secs(10))
                .await
                .context("failed to discover a nearby NDT7 server")?;
            info!(machine = %server.machine, "discovered nearest NDT7 server");
            Ok(Target::Discovered(server))
        }
    }
}

/// a short, silent ping pass against the server host, folded into the
/// final summary document as a prior, independent latency measurement
async fn warmup_ping(host: &str) -> Option<net_stats::Summary> {
    let engine = match Engine::new() {
        Ok(e) => e,
        Err(err) => {
            warn!(%err, "warm-up ping engine unavailable, skipping");
            return None;
        }
    };
    let resolver = resolver::SystemResolver::new().ok()?;
    let addr = *resolver.resolve(host).await.ok()?.iter().next()?;

    let stats = PingStatistics::new(None, 0);
    for _ in 0..WARMUP_PROBES {
        let outcome = engine.ping(addr, Duration::from_secs(1), None).await;
        stats.ingest(outcome);
        tokio::time::sleep(WARMUP_INTERVAL).await;
    }
    Some(stats.summary())
}

async fn run_direction(target: &Target, direction: Test, window: Duration) -> Result<GroupSummary> {
    let mut rx = target.test(direction, TEST_DEADLINE).await?;
    netkit_core::metrics::NDT7_SESSIONS_STARTED.inc();
    let aggregator = Ndt7Aggregator::new(Some(window));
    while let Some((dir, measurement)) = rx.recv().await {
        if let Some(bytes) = measurement.app_info.as_ref() {
            netkit_core::metrics::NDT7_BYTES_TRANSFERRED.inc_by(bytes.num_bytes.max(0) as u64);
        }
        aggregator.ingest(dir, measurement);
    }
    aggregator
        .summary(direction)
        .context("no measurements received for this direction")
}

#[derive(Serialize)]
struct RunDocument {
    server: String,
    ping: Option<net_stats::Summary>,
    download_mbps: Option<f64>,
    upload_mbps: Option<f64>,
    download: Option<ndt7::Measurement>,
    upload: Option<ndt7::Measurement>,
}

async fn run_once(target: &Target, window: Duration, elastic: &Option<Url>, warmup: bool) -> Result<()> {
    let ping_summary = if warmup {
        match target.host() {
            Some(host) => warmup_ping(&host).await,
            None => None,
        }
    } else {
        None
    };

    let download = run_direction(target, Test::Download, window).await;
    let upload = run_direction(target, Test::Upload, window).await;

    let download_mbps = download.as_ref().ok().and_then(|s| s.throughput_mbps());
    let upload_mbps = upload.as_ref().ok().and_then(|s| s.throughput_mbps());

    println!("server: {}", target.label());
    if let Some(ping) = &ping_summary {
        println!("ping (warm-up): loss: {}, rtt: {}", ping.loss_pretty(), ping.latency_pretty());
    }
    match download_mbps {
        Some(mbps) => println!("download: {mbps:.2} Mbps"),
        None => println!("download: failed ({})", download.as_ref().err().map(ToString::to_string).unwrap_or_default()),
    }
    match upload_mbps {
        Some(mbps) => println!("upload: {mbps:.2} Mbps"),
        None => println!("upload: failed ({})", upload.as_ref().err().map(ToString::to_string).unwrap_or_default()),
    }

    let index_log = sink::IndexLog::new(elastic.clone());
    if index_log.is_enabled() {
        let doc = RunDocument {
            server: target.label(),
            ping: ping_summary,
            download_mbps,
            upload_mbps,
            download: download.ok().map(|s| s.last),
            upload: upload.ok().map(|s| s.last),
        };
        index_log.log("ndt7", &doc);
        index_log.drain().await;
    }

    Ok(())
}

/// `ndt7 run`
pub async fn run(args: Ndt7RunArgs) -> Result<()> {
    let target = resolve_target(args.url).await?;
    run_once(&target, args.window, &args.elastic, !args.no_warmup).await
}

/// `ndt7 monitor`: repeat `run` indefinitely, jittered between runs
pub async fn monitor(args: Ndt7MonitorArgs) -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let target = match resolve_target(args.url.clone()).await {
            Ok(t) => Some(t),
            Err(err) => {
                warn!(%err, "ndt7 monitor: could not resolve a target this round, retrying after sleep");
                None
            }
        };
        if let Some(target) = &target {
            if let Err(err) = run_once(target, args.window, &args.elastic, !args.no_warmup).await {
                warn!(%err, "ndt7 monitor: run failed");
            }
        }

        let sleep = netkit_core::time::jittered_interval(
            args.period,
            args.period.mul_f64(0.1),
            args.period.mul_f64(2.5),
        );
        debug!(?sleep, "ndt7 monitor: sleeping until next run");
        tokio::select! {
            _ = tokio::time::sleep(sleep) => {}
            _ = &mut ctrl_c => return Ok(()),
        }
    }
}

/// `ndt7 server`
pub async fn serve(args: Ndt7ServerArgs) -> Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        args.url.host_str().unwrap_or("0.0.0.0"),
        args.url.port_or_known_default().unwrap_or(8080)
    )
    .parse()
    .context("could not turn bind URL into a socket address")?;

    let (tx, mut rx) = mpsc::channel::<(SocketAddr, MeasurementPair)>(256);
    let cfg = ndt7::server::ServerConfig {
        deadline: TEST_DEADLINE,
        measurements: tx,
    };

    tokio::spawn(async move {
        while let Some((peer, (direction, measurement))) = rx.recv().await {
            if let Some(app) = measurement.app_info.as_ref() {
                netkit_core::metrics::NDT7_BYTES_TRANSFERRED.inc_by(app.num_bytes.max(0) as u64);
            }
            debug!(%peer, ?direction, "ndt7 server measurement");
        }
    });

    let guard = ndt7::server::serve(addr, cfg).await.context("failed to bind ndt7 server")?;
    info!(%addr, "ndt7 server listening, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.ok();
    drop(guard);
    Ok(())
}
