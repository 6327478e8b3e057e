//! the NDT7 duplex measurement loop, shared by the client and server roles
//!
//! Exactly one side of a given test transmits the binary load (the
//! *sender*): the server for a download test, the client for an upload
//! test. Both sides, regardless of role, emit a local [`Measurement`] at
//! most once every [`MEASUREMENT_INTERVAL`] and forward the peer's
//! measurement frames to the caller as they arrive. There is no explicit
//! end-of-stream sentinel: the returned channel simply closes when the
//! session ends, which a [`tokio_stream::wrappers::ReceiverStream`]
//! surfaces as the end of iteration.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;

use crate::errors::{Error, Result};
use crate::measurement::{AppInfo, ConnectionInfo, Measurement, Origin, Role, Test, TCPInfo};

/// the NDT7 WebSocket subprotocol name both endpoints must negotiate
pub const WEBSOCKET_SUBPROTOCOL: &str = "net.measurementlab.ndt.v7";

/// `User-Agent` sent by the client role
pub const USER_AGENT: &str = concat!("netkit-ndt7/", env!("CARGO_PKG_VERSION"));

/// largest WebSocket message either side will send or accept
pub const MAX_MESSAGE_SIZE: usize = 1 << 24;

/// starting size of the binary load messages
const MIN_MESSAGE_SIZE: usize = 1 << 13;

/// the sender doubles its message size once the total sent exceeds
/// `current_size * SCALING_FRACTION`, following the upload/download
/// reference implementations' rapid ramp-up
const SCALING_FRACTION: u64 = 16;

/// minimum spacing between locally emitted measurements
pub const MEASUREMENT_INTERVAL: Duration = Duration::from_millis(100);

/// a measurement tagged with the direction its *byte count* belongs to,
/// which is fixed by which role produced it, not by which test is
/// currently running: a locally produced measurement is always tagged
/// upload for the client role and download for the server role, and a
/// peer-parsed measurement always gets the opposite tag. Because
/// exactly one of the two tags coincides with the session's actual
/// test direction, grouping measurements by this tag isolates the
/// series that carries the meaningful byte-rate (the sender's own
/// counters) from the one that doesn't, regardless of which side sent
/// it over the wire.
pub type MeasurementPair = (Test, Measurement);

/// protocol-neutral frame, so [`run`] doesn't need to know whether it is
/// driving a `tokio-tungstenite` client connection or an axum server
/// connection
#[derive(Debug, Clone)]
pub enum Frame {
    /// a measurement JSON document
    Text(String),
    /// a chunk of load-generating payload
    Binary(Bytes),
}

/// a sink accepting outbound [`Frame`]s
pub trait FrameSink: Sink<Frame, Error = Error> + Unpin + Send {}
impl<T> FrameSink for T where T: Sink<Frame, Error = Error> + Unpin + Send {}

/// a stream of inbound frames
pub trait FrameStream: Stream<Item = Result<Frame>> + Unpin + Send {}
impl<T> FrameStream for T where T: Stream<Item = Result<Frame>> + Unpin + Send {}

/// a closure able to snapshot `TCP_INFO` for the underlying socket, if
/// the caller has access to its raw file descriptor
pub type TcpInfoFn = Box<dyn Fn() -> Option<tcpinfo::TcpInfo> + Send>;

/// static parameters of one running test
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// download or upload
    pub direction: Test,
    /// which side of the connection this process is playing
    pub role: Role,
    /// hard cap on the test's duration
    pub deadline: Duration,
    /// connection endpoint strings, attached to every locally emitted
    /// measurement when running as the server
    pub connection_info: Option<ConnectionInfo>,
}

impl SessionConfig {
    /// true if this side transmits the binary load for `direction`
    pub fn is_sender(&self) -> bool {
        matches!(
            (self.role, self.direction),
            (Role::Server, Test::Download) | (Role::Client, Test::Upload)
        )
    }

    fn origin(&self) -> Origin {
        match self.role {
            Role::Client => Origin::Client,
            Role::Server => Origin::Server,
        }
    }

    /// the direction a *locally* produced measurement is tagged with,
    /// fixed by role alone: the client's own progress is always upload,
    /// the server's always download, independent of `self.direction`
    fn producer_direction(&self) -> Test {
        match self.role {
            Role::Client => Test::Upload,
            Role::Server => Test::Download,
        }
    }

    /// the direction a peer-parsed measurement is tagged with, the
    /// opposite of [`Self::producer_direction`]
    fn consumer_direction(&self) -> Test {
        match self.role {
            Role::Client => Test::Download,
            Role::Server => Test::Upload,
        }
    }
}

fn wire_tcp_info(t: tcpinfo::TcpInfo) -> TCPInfo {
    TCPInfo {
        busy_time: t.busy_time.map(|v| v as i64),
        bytes_acked: t.bytes_acked.map(|v| v as i64),
        bytes_received: t.bytes_received.map(|v| v as i64),
        bytes_sent: t.bytes_sent.map(|v| v as i64),
        bytes_retrans: t.bytes_retrans.map(|v| v as i64),
        elapsed_time: None,
        min_rtt: t.min_rtt.map(|v| v as i64),
        rtt: t.rtt.map(|v| v as i64),
        rtt_var: t.rtt_var.map(|v| v as i64),
        rwnd_limited: t.rwnd_limited.map(|v| v as i64),
        snd_buf_limited: t.snd_buf_limited.map(|v| v as i64),
        delta: None,
        rate: None,
    }
}

fn build_measurement(
    cfg: &SessionConfig,
    start: Instant,
    num_bytes: u64,
    tcp_info_fn: Option<&TcpInfoFn>,
) -> Measurement {
    let elapsed = start.elapsed();
    Measurement {
        app_info: Some(AppInfo {
            elapsed_time: elapsed.as_micros() as i64,
            num_bytes: num_bytes as i64,
            ..Default::default()
        }),
        connection_info: cfg.connection_info.clone(),
        origin: Some(cfg.origin()),
        test: Some(cfg.direction),
        tcp_info: tcp_info_fn.and_then(|f| f()).map(wire_tcp_info),
        timestamp: netkit_core::time::wall_clock_secs(),
    }
}

async fn write_loop<Si: FrameSink>(
    sink: &mut Si,
    cfg: &SessionConfig,
    is_sender: bool,
    tcp_info_fn: Option<&TcpInfoFn>,
    bytes_counter: Arc<AtomicU64>,
    tx: mpsc::Sender<MeasurementPair>,
    start: Instant,
) -> Result<()> {
    let mut size = MIN_MESSAGE_SIZE;
    let mut last_measurement = Instant::now();
    let mut rng_state: u64 = start.elapsed().as_nanos() as u64 | 1;

    loop {
        if is_sender {
            let mut buf = vec![0u8; size];
            fill_pseudo_random(&mut buf, &mut rng_state);
            sink.send(Frame::Binary(Bytes::from(buf))).await?;
            let total = bytes_counter.fetch_add(size as u64, Ordering::Relaxed) + size as u64;
            if size < MAX_MESSAGE_SIZE && (size as u64) < total / SCALING_FRACTION {
                size *= 2;
            }
        }

        if last_measurement.elapsed() >= MEASUREMENT_INTERVAL {
            last_measurement = Instant::now();
            let measurement =
                build_measurement(cfg, start, bytes_counter.load(Ordering::Relaxed), tcp_info_fn);
            let json = serde_json::to_string(&measurement)?;
            sink.send(Frame::Text(json)).await?;
            // the channel may already be closed by the receiving side of
            // run(); that's a normal wind-down, not a failure.
            let _ = tx.send((cfg.producer_direction(), measurement)).await;
        }

        if !is_sender {
            tokio::time::sleep(MEASUREMENT_INTERVAL).await;
        } else {
            // a bounded real socket sink naturally applies backpressure
            // here; an always-ready sink (as in tests, or a fast loopback
            // link) would otherwise spin this loop without ever yielding
            // to the runtime, starving the deadline timer.
            tokio::task::yield_now().await;
        }
    }
}

async fn read_loop<St: FrameStream>(
    stream: &mut St,
    cfg: &SessionConfig,
    start: Instant,
    bytes_counter: Arc<AtomicU64>,
    tx: mpsc::Sender<MeasurementPair>,
) -> Result<()> {
    while let Some(frame) = stream.next().await {
        match frame? {
            Frame::Binary(b) => {
                bytes_counter.fetch_add(b.len() as u64, Ordering::Relaxed);
            }
            Frame::Text(s) => {
                let mut measurement: Measurement = serde_json::from_str(&s)?;
                if measurement.app_info.is_none() {
                    measurement.app_info = Some(AppInfo {
                        elapsed_time: start.elapsed().as_micros() as i64,
                        num_bytes: bytes_counter.load(Ordering::Relaxed) as i64,
                        ..Default::default()
                    });
                }
                if tx.send((cfg.consumer_direction(), measurement)).await.is_err() {
                    return Ok(());
                }
            }
        }
    }
    Ok(())
}

/// a cheap, non-cryptographic fill so load bytes aren't all-zero
/// (some paths compress identical bytes, which would understate the
/// achievable throughput); not suitable for any security purpose.
fn fill_pseudo_random(buf: &mut [u8], state: &mut u64) {
    for chunk in buf.chunks_mut(8) {
        *state ^= *state << 13;
        *state ^= *state >> 7;
        *state ^= *state << 17;
        let bytes = state.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }
}

/// drive one NDT7 test to completion, returning a channel of measurements
/// as they are produced (one per locally emitted cadence tick, plus one
/// per peer frame received). The channel closes -- rather than carrying
/// an explicit terminal sentinel -- when the deadline elapses, either
/// side closes the connection, or an unrecoverable protocol error occurs.
///
/// `tcp_info_fn` lets the caller attach kernel `TCP_INFO` counters to
/// locally emitted measurements when it has access to the connection's
/// raw socket; pass `None` when it doesn't (e.g. driving a TLS-wrapped
/// client connection).
pub async fn run<Si, St>(
    sink: Si,
    stream: St,
    cfg: SessionConfig,
    tcp_info_fn: Option<TcpInfoFn>,
) -> mpsc::Receiver<MeasurementPair>
where
    Si: FrameSink + 'static,
    St: FrameStream + 'static,
{
    let (tx, rx) = mpsc::channel(64);
    let is_sender = cfg.is_sender();

    tokio::spawn(async move {
        let mut sink = sink;
        let mut stream = stream;
        let bytes_counter = Arc::new(AtomicU64::new(0));
        let start = Instant::now();
        let tx_write = tx.clone();
        let tx_read = tx.clone();
        drop(tx);

        let write_fut: Pin<Box<dyn Future<Output = Result<()>> + Send>> = Box::pin(write_loop(
            &mut sink,
            &cfg,
            is_sender,
            tcp_info_fn.as_ref(),
            bytes_counter.clone(),
            tx_write,
            start,
        ));
        let read_fut: Pin<Box<dyn Future<Output = Result<()>> + Send>> =
            Box::pin(read_loop(&mut stream, &cfg, start, bytes_counter, tx_read));

        let outcome = tokio::time::timeout(cfg.deadline, async {
            tokio::select! {
                r = write_fut => r,
                r = read_fut => r,
            }
        })
        .await;

        match outcome {
            Ok(Err(e)) => tracing::warn!(error = %e, "ndt7 session ended with an error"),
            Ok(Ok(())) => tracing::debug!("ndt7 session ended (peer closed the connection)"),
            Err(_) => tracing::debug!(deadline = ?cfg.deadline, "ndt7 session reached its deadline"),
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio_stream::wrappers::ReceiverStream;
    use tokio_stream::StreamExt as _;

    struct ChannelSink(mpsc::UnboundedSender<Frame>);
    impl Sink<Frame> for ChannelSink {
        type Error = Error;
        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
            Poll::Ready(Ok(()))
        }
        fn start_send(self: Pin<&mut Self>, item: Frame) -> Result<()> {
            let _ = self.0.send(item);
            Ok(())
        }
        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
            Poll::Ready(Ok(()))
        }
        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    struct QueueStream(VecDeque<Frame>);
    impl Stream for QueueStream {
        type Item = Result<Frame>;
        fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Poll::Ready(self.0.pop_front().map(Ok))
        }
    }

    #[tokio::test]
    async fn sender_side_doubles_message_size_and_emits_measurements() {
        let (tx, mut outbound) = mpsc::unbounded_channel();
        let sink = ChannelSink(tx);
        let stream = QueueStream(VecDeque::new());
        let cfg = SessionConfig {
            direction: Test::Download,
            role: Role::Server,
            deadline: Duration::from_millis(350),
            connection_info: None,
        };

        let rx = run(sink, stream, cfg, None).await;
        let measurements: Vec<_> = ReceiverStream::new(rx).collect().await;
        assert!(!measurements.is_empty());
        assert!(measurements
            .iter()
            .all(|(direction, m)| *direction == Test::Download && m.origin == Some(Origin::Server)));

        let mut saw_binary = false;
        let mut sizes = Vec::new();
        while let Ok(frame) = outbound.try_recv() {
            if let Frame::Binary(b) = frame {
                saw_binary = true;
                sizes.push(b.len());
            }
        }
        assert!(saw_binary);
        assert_eq!(sizes.first().copied(), Some(MIN_MESSAGE_SIZE));
    }

    #[tokio::test]
    async fn receiver_side_forwards_peer_measurements() {
        let peer = Measurement {
            app_info: Some(AppInfo {
                elapsed_time: 1000,
                num_bytes: 2048,
                ..Default::default()
            }),
            origin: Some(Origin::Client),
            test: Some(Test::Upload),
            ..Default::default()
        };
        let json = serde_json::to_string(&peer).unwrap();
        let (tx, _outbound) = mpsc::unbounded_channel();
        let sink = ChannelSink(tx);
        let mut queue = VecDeque::new();
        queue.push_back(Frame::Binary(Bytes::from(vec![0u8; 4096])));
        queue.push_back(Frame::Text(json));
        let stream = QueueStream(queue);
        let cfg = SessionConfig {
            direction: Test::Upload,
            role: Role::Server,
            deadline: Duration::from_millis(250),
            connection_info: None,
        };

        let rx = run(sink, stream, cfg, None).await;
        let measurements: Vec<_> = ReceiverStream::new(rx).collect().await;
        assert!(measurements.iter().any(|(direction, m)| {
            *direction == Test::Upload
                && m.origin == Some(Origin::Client)
                && m.app_info.as_ref().unwrap().num_bytes == 2048
        }));
    }

    #[tokio::test]
    async fn producer_and_consumer_tags_are_fixed_by_role_not_by_direction() {
        // client running a download test: client is the consumer, not the
        // sender, but still writes its own periodic measurement. That
        // local measurement must be tagged upload (the client's producer
        // tag), not download (the session's nominal direction), and the
        // peer's measurement must be tagged download.
        let peer = Measurement {
            app_info: Some(AppInfo {
                elapsed_time: 1000,
                num_bytes: 4096,
                ..Default::default()
            }),
            origin: Some(Origin::Server),
            test: Some(Test::Download),
            ..Default::default()
        };
        let json = serde_json::to_string(&peer).unwrap();
        let (tx, _outbound) = mpsc::unbounded_channel();
        let sink = ChannelSink(tx);
        let mut queue = VecDeque::new();
        queue.push_back(Frame::Text(json));
        let stream = QueueStream(queue);
        let cfg = SessionConfig {
            direction: Test::Download,
            role: Role::Client,
            deadline: Duration::from_millis(250),
            connection_info: None,
        };

        let rx = run(sink, stream, cfg, None).await;
        let measurements: Vec<_> = ReceiverStream::new(rx).collect().await;

        assert!(measurements
            .iter()
            .any(|(direction, m)| *direction == Test::Upload && m.origin == Some(Origin::Client)));
        assert!(measurements
            .iter()
            .any(|(direction, m)| *direction == Test::Download && m.origin == Some(Origin::Server)));
    }

    #[tokio::test]
    async fn missing_app_info_is_synthesized_on_receive() {
        let peer = Measurement {
            origin: Some(Origin::Client),
            test: Some(Test::Upload),
            ..Default::default()
        };
        let json = serde_json::to_string(&peer).unwrap();
        let (tx, _outbound) = mpsc::unbounded_channel();
        let sink = ChannelSink(tx);
        let mut queue = VecDeque::new();
        queue.push_back(Frame::Text(json));
        let stream = QueueStream(queue);
        let cfg = SessionConfig {
            direction: Test::Upload,
            role: Role::Server,
            deadline: Duration::from_millis(150),
            connection_info: None,
        };

        let rx = run(sink, stream, cfg, None).await;
        let measurements: Vec<_> = ReceiverStream::new(rx).collect().await;
        assert!(measurements
            .iter()
            .any(|(_, m)| m.origin == Some(Origin::Client) && m.app_info.is_some()));
    }
}
