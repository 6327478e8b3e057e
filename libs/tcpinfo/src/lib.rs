//! # tcpinfo
//!
//! Snapshot of the kernel's per-socket `TCP_INFO` counters, read directly
//! via `getsockopt(IPPROTO_TCP, TCP_INFO)` rather than by decoding the
//! whole `struct tcp_info`. Only the fields the NDT7 session machine
//! attaches to its measurement frames are extracted; everything else in
//! the kernel buffer is ignored.
//!
//! Linux-only: on every other platform [`snapshot`] always returns
//! `None`.
#![warn(
    missing_debug_implementations,
    missing_docs,
    missing_copy_implementations,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]

/// the subset of `struct tcp_info` fields the NDT7 session machine
/// reports. Each field is `None` if the running kernel's `tcp_info`
/// predates that field (the `getsockopt` buffer came back shorter than
/// the field's offset).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpInfo {
    /// microseconds spent actively sending data with a non-empty write queue
    pub busy_time: Option<u64>,
    /// bytes for which an ACK has been received
    pub bytes_acked: Option<u64>,
    /// bytes for which an ACK has been sent
    pub bytes_received: Option<u64>,
    /// bytes transmitted or retransmitted
    pub bytes_sent: Option<u64>,
    /// bytes retransmitted
    pub bytes_retrans: Option<u64>,
    /// minimum RTT observed by the kernel, in microseconds
    pub min_rtt: Option<u32>,
    /// current smoothed RTT, in microseconds
    pub rtt: Option<u32>,
    /// RTT variance, in microseconds
    pub rtt_var: Option<u32>,
    /// microseconds stalled due to a full receive window at the peer
    pub rwnd_limited: Option<u64>,
    /// microseconds stalled due to a full local send buffer
    pub snd_buf_limited: Option<u64>,
}

#[cfg(target_os = "linux")]
mod linux {
    use super::TcpInfo;
    use std::os::unix::io::RawFd;

    // offsets into `struct tcp_info` (Linux 5.x ABI), computed from the
    // field order/sizes in linux/tcp.h: u8 x 8, then u32 x 24, then u64 x 9
    // interleaved with more u32s, with natural 8-byte alignment before each
    // u64 run.
    const OFF_RTT: usize = 68;
    const OFF_RTTVAR: usize = 72;
    const OFF_BYTES_ACKED: usize = 120;
    const OFF_BYTES_RECEIVED: usize = 128;
    const OFF_MIN_RTT: usize = 148;
    const OFF_BUSY_TIME: usize = 168;
    const OFF_RWND_LIMITED: usize = 176;
    const OFF_SNDBUF_LIMITED: usize = 184;
    const OFF_BYTES_SENT: usize = 200;
    const OFF_BYTES_RETRANS: usize = 208;

    // big enough for every field above plus its width, and for kernels that
    // grow the struct further in the future
    const BUF_LEN: usize = 256;

    fn read_u32(buf: &[u8], len: usize, offset: usize) -> Option<u32> {
        if offset + 4 > len {
            return None;
        }
        Some(u32::from_ne_bytes(buf[offset..offset + 4].try_into().unwrap()))
    }

    fn read_u64(buf: &[u8], len: usize, offset: usize) -> Option<u64> {
        if offset + 8 > len {
            return None;
        }
        Some(u64::from_ne_bytes(buf[offset..offset + 8].try_into().unwrap()))
    }

    /// read `TCP_INFO` for a connected socket identified by `fd`.
    /// Returns `None` if the `getsockopt` call itself fails (e.g. `fd` is
    /// not a TCP socket).
    pub(crate) fn snapshot_fd(fd: RawFd) -> Option<TcpInfo> {
        let mut buf = [0u8; BUF_LEN];
        let mut optlen = BUF_LEN as libc::socklen_t;
        // SAFETY: `fd` is a valid, open socket for the lifetime of this call
        // (guaranteed by the caller holding a live connection); `buf` and
        // `optlen` are sized/initialized for the getsockopt contract.
        let ret = unsafe {
            libc::getsockopt(
                fd,
                libc::IPPROTO_TCP,
                libc::TCP_INFO,
                buf.as_mut_ptr() as *mut libc::c_void,
                &mut optlen,
            )
        };
        if ret != 0 {
            return None;
        }
        let len = optlen as usize;
        Some(TcpInfo {
            busy_time: read_u64(&buf, len, OFF_BUSY_TIME),
            bytes_acked: read_u64(&buf, len, OFF_BYTES_ACKED),
            bytes_received: read_u64(&buf, len, OFF_BYTES_RECEIVED),
            bytes_sent: read_u64(&buf, len, OFF_BYTES_SENT),
            bytes_retrans: read_u64(&buf, len, OFF_BYTES_RETRANS),
            min_rtt: read_u32(&buf, len, OFF_MIN_RTT),
            rtt: read_u32(&buf, len, OFF_RTT),
            rtt_var: read_u32(&buf, len, OFF_RTTVAR),
            rwnd_limited: read_u64(&buf, len, OFF_RWND_LIMITED),
            snd_buf_limited: read_u64(&buf, len, OFF_SNDBUF_LIMITED),
        })
    }
}

/// snapshot `TCP_INFO` for any socket-like type exposing a raw file
/// descriptor (`std::net::TcpStream`, `tokio::net::TcpStream`, or the
/// raw socket underneath a WebSocket connection). Returns `None` on
/// non-Linux platforms, or if the kernel call itself fails.
#[cfg(target_os = "linux")]
pub fn snapshot<S: std::os::unix::io::AsRawFd>(sock: &S) -> Option<TcpInfo> {
    linux::snapshot_fd(sock.as_raw_fd())
}

/// always `None`: `TCP_INFO` is a Linux-only `getsockopt` extension.
#[cfg(not(target_os = "linux"))]
pub fn snapshot<S>(_sock: &S) -> Option<TcpInfo> {
    None
}

/// snapshot `TCP_INFO` given a bare file descriptor rather than a typed
/// socket handle, for callers that only have the descriptor left (e.g. a
/// closure captured after the owning stream has been split into separate
/// sink/stream halves, where the original `AsRawFd` handle is gone but
/// the descriptor itself stays open and valid for as long as those
/// halves live).
#[cfg(target_os = "linux")]
pub fn snapshot_by_fd(fd: std::os::unix::io::RawFd) -> Option<TcpInfo> {
    linux::snapshot_fd(fd)
}

/// always `None` on non-Linux platforms.
#[cfg(not(target_os = "linux"))]
pub fn snapshot_by_fd(_fd: i32) -> Option<TcpInfo> {
    None
}

#[cfg(test)]
#[cfg(target_os = "linux")]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_tcp_connection_reports_tcpinfo() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let _server = accept.await.unwrap();

        let info = snapshot(&client).expect("TCP_INFO should be available for a live socket");
        // a fresh loopback connection reports small but present counters
        assert!(info.rtt.is_some() || info.min_rtt.is_some() || info.bytes_sent.is_some());
    }
}
