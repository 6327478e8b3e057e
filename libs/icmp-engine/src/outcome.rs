use std::net::IpAddr;
use std::time::{Duration, Instant};

/// random payload size, in bytes, attached to every probe
pub const PAYLOAD_SIZE: usize = 10;
pub type Payload = [u8; PAYLOAD_SIZE];

/// lifecycle state of a [`ProbeOutcome`]. Transitions out of `Pending`
/// happen exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// created, not yet handed to the kernel
    Scheduled,
    /// send flushed, awaiting a matching reply or timeout
    Pending,
    /// matching ECHO_REPLY received
    Success,
    /// the send syscall failed
    Unreachable,
    /// no reply arrived before the per-probe timeout fired
    Timeout,
    /// the engine shut down while this probe was pending
    Canceled,
}

impl Status {
    /// true for every status reachable only via the single allowed
    /// exit transition out of `Pending`
    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::Scheduled | Status::Pending)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Status::Scheduled => "SCHEDULED",
            Status::Pending => "PENDING",
            Status::Success => "SUCCESS",
            Status::Unreachable => "UNREACHABLE",
            Status::Timeout => "TIMEOUT",
            Status::Canceled => "CANCELED",
        })
    }
}

/// the immutable (once terminal) record of a single ICMP probe
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub destination: IpAddr,
    pub seq_cnt: u16,
    pub payload: Payload,
    pub start: Instant,
    pub end: Option<Instant>,
    pub status: Status,
    /// wall-clock seconds at creation, for logging/sink documents
    pub wall_clock: f64,
    /// caller-supplied out-of-band label, e.g. the hostname that
    /// resolved to `destination`
    pub label: Option<String>,
}

impl ProbeOutcome {
    pub(crate) fn scheduled(
        destination: IpAddr,
        seq_cnt: u16,
        payload: Payload,
        label: Option<String>,
    ) -> Self {
        Self {
            destination,
            seq_cnt,
            payload,
            start: Instant::now(),
            end: None,
            status: Status::Scheduled,
            wall_clock: netkit_core::time::wall_clock_secs(),
            label,
        }
    }

    /// move to a terminal status. Panics (debug builds only) on a
    /// second terminal transition -- the engine guarantees each probe
    /// reaches exactly one.
    pub(crate) fn finish(&mut self, status: Status) {
        debug_assert!(status.is_terminal(), "finish() requires a terminal status");
        debug_assert!(
            self.end.is_none(),
            "exactly-once terminal transition violated for seq={}",
            self.seq_cnt
        );
        self.status = status;
        self.end = Some(Instant::now());
    }

    pub(crate) fn pending(&mut self) {
        debug_assert_eq!(self.status, Status::Scheduled);
        self.status = Status::Pending;
    }

    /// round-trip time, once terminal
    pub fn elapsed(&self) -> Option<Duration> {
        self.end.map(|end| end.saturating_duration_since(self.start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_set_iff_terminal() {
        let mut outcome = ProbeOutcome::scheduled("127.0.0.1".parse().unwrap(), 1, [0; PAYLOAD_SIZE], None);
        assert!(outcome.end.is_none());
        outcome.pending();
        assert!(outcome.end.is_none());
        outcome.finish(Status::Timeout);
        assert!(outcome.end.is_some());
        assert!(outcome.status.is_terminal());
    }
}
