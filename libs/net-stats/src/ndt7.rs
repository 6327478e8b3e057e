//! sliding-window delta/rate aggregation over NDT7 measurement series
//!
//! Mirrors [`crate::ping::PingStatistics`] for the NDT7 side of the
//! toolkit: instead of loss/latency over probe outcomes, this tracks
//! per-field byte/time deltas and rates between the first and last
//! [`Measurement`] seen in a rolling time window, grouped by test
//! direction.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use ndt7::{AppInfo, AppInfoDelta, AppInfoRate, Measurement, Test, TCPInfoDelta, TCPInfoRate};
use parking_lot::Mutex;

/// a window-group entry: either the `INITIAL` sentinel seeded when the
/// group is created, or a real measurement. Re-architected from the
/// source implementation's object-identity check on a module-level
/// `INITIAL_MEASUREMENT` singleton into a tagged variant.
#[derive(Debug, Clone)]
enum Entry {
    Initial,
    Real(Measurement),
}

impl Entry {
    fn is_initial(&self) -> bool {
        matches!(self, Entry::Initial)
    }

    /// the `INITIAL` sentinel as a zeroed `AppInfo`-only measurement --
    /// counters are zero, `TCPInfo` is simply not yet known
    fn as_measurement(&self) -> Measurement {
        match self {
            Entry::Initial => Measurement {
                app_info: Some(AppInfo {
                    elapsed_time: 0,
                    num_bytes: 0,
                    ..Default::default()
                }),
                ..Default::default()
            },
            Entry::Real(m) => m.clone(),
        }
    }
}

/// `a`'s elapsed time minus `b`'s, in seconds, using whichever
/// sub-record (`AppInfo` then `TCPInfo`) carries an elapsed time in
/// both measurements, else falling back to the wall-clock `timestamp`.
/// Anti-symmetric: `time_difference(a, b) == -time_difference(b, a)`.
pub fn time_difference(a: &Measurement, b: &Measurement) -> f64 {
    if let (Some(ai), Some(bi)) = (&a.app_info, &b.app_info) {
        return (ai.elapsed_time - bi.elapsed_time) as f64 / 1_000_000.0;
    }
    if let (Some(at), Some(bt)) = (&a.tcp_info, &b.tcp_info) {
        if let (Some(ae), Some(be)) = (at.elapsed_time, bt.elapsed_time) {
            return (ae - be) as f64 / 1_000_000.0;
        }
    }
    a.timestamp - b.timestamp
}

/// below this elapsed time between first and last, rates are not
/// computed (division by a near-zero interval is meaningless noise)
const MIN_RATE_INTERVAL: f64 = 0.010;

struct Group {
    window: Option<Duration>,
    list: VecDeque<Entry>,
}

impl Group {
    fn new(window: Option<Duration>) -> Self {
        Self {
            window,
            list: VecDeque::from([Entry::Initial]),
        }
    }

    fn insert(&mut self, measurement: Measurement) {
        self.list.push_back(Entry::Real(measurement));

        while self.list.len() >= 3 && self.list.front().is_some_and(Entry::is_initial) {
            self.list.pop_front();
        }

        match self.window {
            None => {
                // keep only first and last: drop index 1 while length >= 3
                while self.list.len() >= 3 {
                    self.list.remove(1);
                }
            }
            Some(window) => {
                let window_secs = window.as_secs_f64();
                while self.list.len() >= 2 {
                    let second = self.list[1].as_measurement();
                    let last = self.list.back().expect("checked len >= 2").as_measurement();
                    if time_difference(&last, &second) >= window_secs {
                        self.list.pop_front();
                    } else {
                        break;
                    }
                }
            }
        }
    }

    /// the group's current `(first, last)` span, with `last` annotated
    /// with per-field `Delta`/`Rate` against `first`. `None` until at
    /// least two entries (including the `INITIAL` sentinel) exist.
    fn summary(&self) -> Option<GroupSummary> {
        if self.list.len() < 2 {
            return None;
        }
        let first = self.list.front().unwrap().as_measurement();
        let mut last = self.list.back().unwrap().as_measurement();
        let elapsed_secs = time_difference(&last, &first);

        if elapsed_secs > MIN_RATE_INTERVAL {
            if let (Some(fa), Some(la)) = (&first.app_info, last.app_info.clone()) {
                let delta = AppInfoDelta {
                    elapsed_time: la.elapsed_time - fa.elapsed_time,
                    num_bytes: la.num_bytes - fa.num_bytes,
                };
                let rate = AppInfoRate {
                    num_bytes: delta.num_bytes as f64 / elapsed_secs,
                };
                if let Some(app) = last.app_info.as_mut() {
                    app.delta = Some(delta);
                    app.rate = Some(rate);
                }
            }

            if let (Some(ft), Some(lt)) = (first.tcp_info.clone(), last.tcp_info.clone()) {
                let delta = TCPInfoDelta {
                    busy_time: lt.busy_time.unwrap_or(0) - ft.busy_time.unwrap_or(0),
                    bytes_acked: lt.bytes_acked.unwrap_or(0) - ft.bytes_acked.unwrap_or(0),
                    bytes_received: lt.bytes_received.unwrap_or(0) - ft.bytes_received.unwrap_or(0),
                    bytes_sent: lt.bytes_sent.unwrap_or(0) - ft.bytes_sent.unwrap_or(0),
                    bytes_retrans: lt.bytes_retrans.unwrap_or(0) - ft.bytes_retrans.unwrap_or(0),
                    elapsed_time: lt.elapsed_time.unwrap_or(0) - ft.elapsed_time.unwrap_or(0),
                    rwnd_limited: lt.rwnd_limited.unwrap_or(0) - ft.rwnd_limited.unwrap_or(0),
                    snd_buf_limited: lt.snd_buf_limited.unwrap_or(0) - ft.snd_buf_limited.unwrap_or(0),
                };
                let rate = TCPInfoRate {
                    busy_time: delta.busy_time as f64 / elapsed_secs,
                    bytes_acked: delta.bytes_acked as f64 / elapsed_secs,
                    bytes_received: delta.bytes_received as f64 / elapsed_secs,
                    bytes_sent: delta.bytes_sent as f64 / elapsed_secs,
                    bytes_retrans: delta.bytes_retrans as f64 / elapsed_secs,
                    elapsed_time: delta.elapsed_time as f64 / elapsed_secs,
                    rwnd_limited: delta.rwnd_limited as f64 / elapsed_secs,
                    snd_buf_limited: delta.snd_buf_limited as f64 / elapsed_secs,
                };
                if let Some(tcp) = last.tcp_info.as_mut() {
                    tcp.delta = Some(delta);
                    tcp.rate = Some(rate);
                }
            }
        }

        Some(GroupSummary {
            first,
            last,
            elapsed_secs,
        })
    }
}

/// the span an [`Ndt7Aggregator`] group currently covers. `last` carries
/// the per-field `Delta`/`Rate` annotations computed against `first`,
/// ready to be serialized straight into an index-log document.
#[derive(Debug, Clone)]
pub struct GroupSummary {
    /// oldest measurement still in the window (or the `INITIAL` zero
    /// sentinel, if only one real measurement has arrived so far)
    pub first: Measurement,
    /// newest measurement, annotated with `Delta`/`Rate` against `first`
    pub last: Measurement,
    /// `first` to `last` elapsed time, in seconds
    pub elapsed_secs: f64,
}

impl GroupSummary {
    /// throughput in Mbps: `8 * Rate * 1e-6`, preferring `TCPInfo`'s
    /// `BytesSent` rate, falling back to `AppInfo.NumBytes`'s rate when
    /// `TCPInfo` is unavailable (e.g. driving a TLS-wrapped connection,
    /// or a non-Linux host). `BytesSent` is always the right field here:
    /// this group only ever holds measurements tagged with the direction
    /// whose sender produced them, so `last` is always the sender's own
    /// measurement of its own send rate, never the receiver's.
    pub fn throughput_mbps(&self) -> Option<f64> {
        let bytes_per_sec = self
            .last
            .tcp_info
            .as_ref()
            .and_then(|t| t.rate.as_ref())
            .map(|r| r.bytes_sent)
            .or_else(|| self.last.app_info.as_ref().and_then(|a| a.rate.as_ref()).map(|r| r.num_bytes))?;
        Some(8.0 * bytes_per_sec * 1e-6)
    }
}

/// incrementally-updated NDT7 measurement aggregator, grouped by test
/// direction. Cheap to clone: clones share the same underlying state.
#[derive(Clone)]
pub struct Ndt7Aggregator {
    window: Option<Duration>,
    groups: Arc<Mutex<HashMap<Test, Group>>>,
}

impl std::fmt::Debug for Ndt7Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ndt7Aggregator").finish_non_exhaustive()
    }
}

impl Ndt7Aggregator {
    /// `window` bounds how long a measurement stays eligible for the
    /// delta/rate computation; `None` keeps only the first and latest
    /// measurement per group, regardless of how long ago the first one
    /// arrived.
    pub fn new(window: Option<Duration>) -> Self {
        Self {
            window,
            groups: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// ingest one measurement into `direction`'s group
    pub fn ingest(&self, direction: Test, measurement: Measurement) {
        let mut groups = self.groups.lock();
        groups
            .entry(direction)
            .or_insert_with(|| Group::new(self.window))
            .insert(measurement);
    }

    /// the current `(first, last)` span for `direction`'s group, if at
    /// least one real measurement has been ingested for it
    pub fn summary(&self, direction: Test) -> Option<GroupSummary> {
        self.groups.lock().get(&direction)?.summary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(elapsed_us: i64, num_bytes: i64) -> Measurement {
        Measurement {
            app_info: Some(AppInfo {
                elapsed_time: elapsed_us,
                num_bytes,
                ..Default::default()
            }),
            test: Some(Test::Download),
            ..Default::default()
        }
    }

    #[test]
    fn time_difference_is_antisymmetric() {
        let a = app(500_000, 0);
        let b = app(100_000, 0);
        assert_eq!(time_difference(&a, &b), -time_difference(&b, &a));
    }

    #[test]
    fn unwindowed_group_keeps_only_first_and_last() {
        let agg = Ndt7Aggregator::new(None);
        for (elapsed, bytes) in [(0, 0), (100_000, 1_000), (200_000, 2_000), (300_000, 3_000)] {
            agg.ingest(Test::Download, app(elapsed, bytes));
        }
        let summary = agg.summary(Test::Download).unwrap();
        assert_eq!(summary.first.app_info.unwrap().elapsed_time, 0);
        assert_eq!(summary.last.app_info.as_ref().unwrap().elapsed_time, 300_000);
    }

    #[test]
    fn windowed_group_evicts_entries_older_than_the_window() {
        let agg = Ndt7Aggregator::new(Some(Duration::from_secs(1)));
        for (elapsed, bytes) in [
            (0, 0),
            (100_000, 1_000),
            (200_000, 2_000),
            (5_100_000, 50_000),
        ] {
            agg.ingest(Test::Download, app(elapsed, bytes));
        }
        let summary = agg.summary(Test::Download).unwrap();
        // the last entry is always retained, and eviction never drops
        // the group below two entries even once every prior entry falls
        // outside the window
        assert_eq!(summary.last.app_info.as_ref().unwrap().elapsed_time, 5_100_000);
        assert!(summary.first.app_info.unwrap().elapsed_time < 5_100_000);
    }

    #[test]
    fn rate_and_delta_attach_once_elapsed_exceeds_the_noise_floor() {
        let agg = Ndt7Aggregator::new(None);
        agg.ingest(Test::Download, app(0, 0));
        agg.ingest(Test::Download, app(1_000_000, 1_000_000));
        let summary = agg.summary(Test::Download).unwrap();
        let app_info = summary.last.app_info.unwrap();
        let delta = app_info.delta.unwrap();
        assert_eq!(delta.num_bytes, 1_000_000);
        let rate = app_info.rate.unwrap();
        assert!((rate.num_bytes - 1_000_000.0).abs() < 1.0);
    }

    #[test]
    fn no_rate_below_the_noise_floor() {
        let agg = Ndt7Aggregator::new(None);
        agg.ingest(Test::Download, app(0, 0));
        agg.ingest(Test::Download, app(5_000, 100));
        let summary = agg.summary(Test::Download).unwrap();
        assert!(summary.last.app_info.unwrap().rate.is_none());
    }
}
