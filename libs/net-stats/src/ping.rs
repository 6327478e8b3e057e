//! sliding-window latency/loss statistics over ICMP probe outcomes

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use icmp_engine::{Engine, Payload, ProbeOutcome, Status};
use parking_lot::Mutex;
use serde::Serialize;

const TIME_RESOLUTION_US: f64 = 1_000_000.0;
const STATUSES: [Status; 6] = [
    Status::Scheduled,
    Status::Pending,
    Status::Success,
    Status::Unreachable,
    Status::Timeout,
    Status::Canceled,
];

fn status_index(status: Status) -> usize {
    STATUSES.iter().position(|s| *s == status).expect("exhaustive")
}

/// correlation key mirroring the ordering the source implementation uses
/// for its sorted result set: earliest start first, then sequence/payload
/// to break ties between probes that started in the same instant
type ResultKey = (Instant, u16, Payload);

struct Inner {
    window: Option<Duration>,
    status_count: [i64; STATUSES.len()],
    results: BTreeMap<ResultKey, ProbeOutcome>,
    total_sent: u64,
    elapsed_n: u64,
    elapsed_sum_us: i128,
    elapsed_sum_sqr_us: i128,
    /// SUCCESS round-trip times in seconds, kept sorted for quantiles
    elapsed_all: Vec<f64>,
    changed: bool,
    cached_summary: Option<Summary>,
}

impl Inner {
    fn key_of(outcome: &ProbeOutcome) -> ResultKey {
        (outcome.start, outcome.seq_cnt, outcome.payload)
    }

    fn record(&mut self, outcome: &ProbeOutcome) {
        if outcome.status == Status::Success {
            if let Some(elapsed) = outcome.elapsed() {
                let secs = elapsed.as_secs_f64();
                let pos = self.elapsed_all.partition_point(|&x| x < secs);
                self.elapsed_all.insert(pos, secs);
                let us = (secs * TIME_RESOLUTION_US) as i128;
                self.elapsed_n += 1;
                self.elapsed_sum_us += us;
                self.elapsed_sum_sqr_us += us * us;
            }
        }
    }

    fn unrecord(&mut self, outcome: &ProbeOutcome) {
        if outcome.status == Status::Success {
            if let Some(elapsed) = outcome.elapsed() {
                let secs = elapsed.as_secs_f64();
                if let Ok(pos) = self.elapsed_all.binary_search_by(|x| x.partial_cmp(&secs).unwrap()) {
                    self.elapsed_all.remove(pos);
                }
                let us = (secs * TIME_RESOLUTION_US) as i128;
                self.elapsed_n = self.elapsed_n.saturating_sub(1);
                self.elapsed_sum_us -= us;
                self.elapsed_sum_sqr_us -= us * us;
            }
        }
    }

    fn add_terminal(&mut self, outcome: ProbeOutcome) {
        self.changed = true;
        self.status_count[status_index(outcome.status)] += 1;
        self.record(&outcome);
        if self.window.is_some() {
            self.results.insert(Self::key_of(&outcome), outcome);
        }
    }

    fn flush_old(&mut self) {
        let Some(window) = self.window else { return };
        let keep_since = Instant::now().checked_sub(window).unwrap_or_else(Instant::now);
        loop {
            let Some((&key, _)) = self.results.iter().next() else { break };
            if key.0 >= keep_since {
                break;
            }
            let (_, outcome) = self.results.remove_entry(&key).unwrap();
            self.status_count[status_index(outcome.status)] -= 1;
            self.unrecord(&outcome);
            self.changed = true;
        }
    }

    fn summary(&mut self) -> Summary {
        if self.changed || self.cached_summary.is_none() {
            self.flush_old();
            let n = self.elapsed_n;
            let elapsed_mean_us = if n >= 1 {
                Some(self.elapsed_sum_us as f64 / n as f64)
            } else {
                None
            };
            let elapsed_std_us = if n >= 2 {
                let mean = elapsed_mean_us.unwrap();
                let var = (self.elapsed_sum_sqr_us as f64 - n as f64 * mean * mean) / (n as f64 - 1.0);
                Some(var.max(0.0).sqrt())
            } else {
                None
            };

            let quantiles = if self.elapsed_all.is_empty() {
                None
            } else {
                Some(quantiles(&self.elapsed_all, &[0.0, 0.25, 0.5, 0.75, 1.0]))
            };

            let mut status_count = std::collections::HashMap::with_capacity(STATUSES.len());
            for (i, status) in STATUSES.iter().enumerate() {
                status_count.insert(*status, self.status_count[i]);
            }

            let summary = Summary {
                status_count,
                elapsed_mean: elapsed_mean_us.map(|us| us / TIME_RESOLUTION_US),
                elapsed_std: elapsed_std_us.map(|us| us / TIME_RESOLUTION_US),
                elapsed_quantiles: quantiles,
            };
            self.cached_summary = Some(summary.clone());
            self.changed = false;
        }
        self.cached_summary.clone().unwrap()
    }
}

/// linear-interpolation quantile: `i = q*(n-1)`, interpolating between
/// `sorted[floor(i)]` and `sorted[floor(i)+1]`
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let i = q * (sorted.len() - 1) as f64;
    let f = i.floor();
    let frac = i - f;
    let lo = sorted[f as usize];
    let hi = sorted[(f as usize + 1).min(sorted.len() - 1)];
    lo + frac * (hi - lo)
}

/// quantiles at each of `qs`, assuming `sorted` is already ascending
pub fn quantiles(sorted: &[f64], qs: &[f64]) -> Vec<f64> {
    qs.iter().map(|&q| quantile(sorted, q)).collect()
}

/// a snapshot of [`PingStatistics`], cheap to clone and safe to log
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    /// count of probes currently in each lifecycle status
    #[serde(serialize_with = "serialize_status_count")]
    pub status_count: std::collections::HashMap<Status, i64>,
    /// mean round-trip time, in seconds, over SUCCESS probes
    pub elapsed_mean: Option<f64>,
    /// sample standard deviation of round-trip time, in seconds
    pub elapsed_std: Option<f64>,
    /// round-trip time quantiles at (0, .25, .5, .75, 1), in seconds
    pub elapsed_quantiles: Option<Vec<f64>>,
}

fn serialize_status_count<S>(
    map: &std::collections::HashMap<Status, i64>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use serde::ser::SerializeMap;
    let mut out = serializer.serialize_map(Some(map.len()))?;
    for (status, count) in map {
        out.serialize_entry(&status.to_string(), count)?;
    }
    out.end()
}

impl Summary {
    /// fraction of completed probes (SUCCESS + TIMEOUT + UNREACHABLE)
    /// that did not succeed. `None` if no probe has completed yet.
    pub fn loss(&self) -> Option<f64> {
        let success = *self.status_count.get(&Status::Success).unwrap_or(&0);
        let lost = *self.status_count.get(&Status::Timeout).unwrap_or(&0)
            + *self.status_count.get(&Status::Unreachable).unwrap_or(&0);
        let total = success + lost;
        if total > 0 {
            Some(lost as f64 / total as f64)
        } else {
            None
        }
    }

    /// `"12.3 ± 1.0 ms"`-style rendering, `"N/A"` with no SUCCESS probes yet
    pub fn latency_pretty(&self) -> String {
        match self.elapsed_mean {
            None => "N/A".to_string(),
            Some(mean) => {
                let mut s = format!("{:.1}", 1000.0 * mean);
                if let Some(std) = self.elapsed_std {
                    s.push_str(&format!(" \u{b1} {:.1}", 1000.0 * std));
                }
                s.push_str(" ms");
                s
            }
        }
    }

    /// `"4.2 %"`-style rendering, `"N/A"` before any probe has completed
    pub fn loss_pretty(&self) -> String {
        match self.loss() {
            None => "N/A".to_string(),
            Some(loss) => format!("{:.1} %", 100.0 * loss),
        }
    }
}

/// an incrementally-updated, optionally time-windowed summary of ICMP
/// probe outcomes. Cheap to clone: clones share the same underlying
/// state.
#[derive(Clone)]
pub struct PingStatistics {
    inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for PingStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PingStatistics").finish_non_exhaustive()
    }
}

impl PingStatistics {
    /// `window` bounds how long a completed probe stays in the summary;
    /// `None` keeps every probe for the statistics object's lifetime.
    /// `num_scheduled` seeds the SCHEDULED bucket for probes already
    /// queued by the caller before this statistics object was attached.
    pub fn new(window: Option<Duration>, num_scheduled: i64) -> Self {
        let mut status_count = [0i64; STATUSES.len()];
        status_count[status_index(Status::Scheduled)] = num_scheduled;
        Self {
            inner: Arc::new(Mutex::new(Inner {
                window,
                status_count,
                results: BTreeMap::new(),
                total_sent: 0,
                elapsed_n: 0,
                elapsed_sum_us: 0,
                elapsed_sum_sqr_us: 0,
                elapsed_all: Vec::new(),
                changed: true,
                cached_summary: None,
            })),
        }
    }

    /// ingest an already-terminal outcome directly, without going
    /// through [`PingStatistics::spawn_probe`]'s pending bookkeeping
    pub fn ingest(&self, outcome: ProbeOutcome) {
        debug_assert!(outcome.status.is_terminal());
        let mut inner = self.inner.lock();
        inner.total_sent += 1;
        if inner.status_count[status_index(Status::Scheduled)] > 0 {
            inner.status_count[status_index(Status::Scheduled)] -= 1;
        }
        inner.add_terminal(outcome);
    }

    /// fire one probe through `engine` and track its full lifecycle: a
    /// PENDING count bump the instant the probe is spawned, followed by
    /// re-ingestion of its terminal outcome once it completes -- the
    /// same two-step bookkeeping the reference implementation drives via
    /// a future "done" callback, expressed here as a reaper task
    /// watching the probe's `JoinHandle`.
    pub fn spawn_probe(&self, engine: Arc<Engine>, destination: IpAddr, timeout: Duration, label: Option<String>) {
        {
            let mut inner = self.inner.lock();
            inner.changed = true;
            inner.total_sent += 1;
            if inner.status_count[status_index(Status::Scheduled)] > 0 {
                inner.status_count[status_index(Status::Scheduled)] -= 1;
            }
            inner.status_count[status_index(Status::Pending)] += 1;
        }

        let stats = self.clone();
        tokio::spawn(async move {
            let outcome = engine.ping(destination, timeout, label).await;
            let mut inner = stats.inner.lock();
            inner.status_count[status_index(Status::Pending)] -= 1;
            inner.add_terminal(outcome);
        });
    }

    /// current summary, evicting anything older than the configured
    /// window first
    pub fn summary(&self) -> Summary {
        self.inner.lock().summary()
    }

    /// total probes ever ingested, regardless of window eviction
    pub fn total_sent(&self) -> u64 {
        self.inner.lock().total_sent
    }
}

/// an ungrouped [`PingStatistics`] total alongside per-key breakdowns --
/// keyed by host label, [`netkit_core::IpVersion`], or concrete address,
/// as the orchestration layer needs. Every outcome ingested updates both
/// the total and its key's group; keys are created lazily on first use.
#[derive(Clone)]
pub struct GroupedPingStatistics<K> {
    window: Option<Duration>,
    total: PingStatistics,
    groups: Arc<Mutex<HashMap<K, PingStatistics>>>,
}

impl<K> std::fmt::Debug for GroupedPingStatistics<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupedPingStatistics").finish_non_exhaustive()
    }
}

impl<K: Eq + Hash + Clone> GroupedPingStatistics<K> {
    /// `window` applies uniformly to the total and to every group
    pub fn new(window: Option<Duration>) -> Self {
        Self {
            window,
            total: PingStatistics::new(window, 0),
            groups: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// record a terminal outcome under `key`, creating the group if this
    /// is its first probe
    pub fn ingest(&self, key: K, outcome: ProbeOutcome) {
        self.total.ingest(outcome.clone());
        let mut groups = self.groups.lock();
        groups
            .entry(key)
            .or_insert_with(|| PingStatistics::new(self.window, 0))
            .ingest(outcome);
    }

    /// the ungrouped total across every key
    pub fn total(&self) -> &PingStatistics {
        &self.total
    }

    /// `key`'s summary, if at least one probe has been ingested under it
    pub fn group(&self, key: &K) -> Option<Summary> {
        self.groups.lock().get(key).map(PingStatistics::summary)
    }

    /// a summary for every key seen so far
    pub fn summaries(&self) -> HashMap<K, Summary> {
        self.groups.lock().iter().map(|(k, v)| (k.clone(), v.summary())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantile_interpolates_linearly() {
        let sorted = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile(&sorted, 0.0), 1.0);
        assert_eq!(quantile(&sorted, 1.0), 5.0);
        assert_eq!(quantile(&sorted, 0.5), 3.0);
        assert_eq!(quantile(&sorted, 0.25), 2.0);
    }

    #[tokio::test]
    async fn ping_loopback_updates_summary_and_loss() {
        let engine = Arc::new(Engine::new().expect("requires ICMP socket permissions"));
        let stats = PingStatistics::new(None, 0);
        stats.spawn_probe(engine.clone(), "127.0.0.1".parse().unwrap(), Duration::from_secs(1), None);
        // allow the reaper task to observe completion
        tokio::time::sleep(Duration::from_millis(200)).await;

        let summary = stats.summary();
        assert_eq!(summary.loss(), Some(0.0));
        assert!(summary.elapsed_mean.is_some());
        assert_eq!(stats.total_sent(), 1);
    }

    #[tokio::test]
    async fn unreachable_probe_counts_as_loss() {
        let engine = Arc::new(Engine::new().expect("requires ICMP socket permissions"));
        let stats = PingStatistics::new(None, 0);
        stats.spawn_probe(
            engine.clone(),
            "192.0.2.1".parse().unwrap(),
            Duration::from_millis(50),
            Some("doc-example".into()),
        );
        tokio::time::sleep(Duration::from_millis(150)).await;

        let summary = stats.summary();
        assert_eq!(summary.loss(), Some(1.0));
        assert_eq!(summary.latency_pretty(), "N/A");
    }

    #[tokio::test]
    async fn grouped_statistics_tracks_total_and_per_key_breakdown() {
        let engine = Arc::new(Engine::new().expect("requires ICMP socket permissions"));
        let groups: GroupedPingStatistics<&'static str> = GroupedPingStatistics::new(None);

        let good = engine.ping("127.0.0.1".parse().unwrap(), Duration::from_secs(1), None).await;
        let bad = engine.ping("192.0.2.1".parse().unwrap(), Duration::from_millis(50), None).await;
        groups.ingest("good-host", good);
        groups.ingest("bad-host", bad);

        assert_eq!(groups.total().total_sent(), 2);
        assert_eq!(groups.group(&"good-host").unwrap().loss(), Some(0.0));
        assert_eq!(groups.group(&"bad-host").unwrap().loss(), Some(1.0));
        assert!(groups.group(&"unseen-host").is_none());
        assert_eq!(groups.summaries().len(), 2);
    }
}
