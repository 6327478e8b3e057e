//! # icmp-engine
//!
//! Emits ECHO_REQUEST datagrams over non-blocking DGRAM-ICMP sockets
//! (falling back to RAW when the kernel refuses DGRAM, e.g. because
//! `ping_group_range` is unset) and correlates ECHO_REPLY datagrams to
//! outstanding probes by `(sequence, payload)`.
#![warn(
    missing_debug_implementations,
    missing_copy_implementations,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![allow(clippy::cognitive_complexity)]

mod errors;
mod icmp;
mod outcome;
mod shutdown;
mod socket;

pub use crate::errors::{Error, Result};
pub use crate::icmp::{Decode, EchoReply, EchoRequest, Encode, ICMP_HEADER_SIZE, Icmpv4, Icmpv6};
pub use crate::outcome::{PAYLOAD_SIZE, Payload, ProbeOutcome, Status};
use crate::icmp::Proto;
use crate::socket::Socket;

use parking_lot::Mutex;
use shutdown::Shutdown;
use socket2::{Domain, Protocol, Type};
use tokio::sync::{broadcast, oneshot};
use tokio::task;
use tracing::{debug, error, trace, warn};

use core::fmt;
use std::{
    collections::HashMap,
    io,
    marker::PhantomData,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    sync::atomic::{AtomicU16, Ordering},
    time::{Duration, Instant},
};

const ECHO_REQUEST_BUFFER_SIZE: usize = ICMP_HEADER_SIZE + PAYLOAD_SIZE;
type EchoRequestBuffer = [u8; ECHO_REQUEST_BUFFER_SIZE];

/// correlation key for an in-flight probe
type Key = (u16, Payload);
type PendingMap = Arc<Mutex<HashMap<Key, oneshot::Sender<EchoReply>>>>;

/// default per-probe timeout, matching the source implementation
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// a socket that knows how to speak ICMP for one address family
pub struct IcmpEcho<M> {
    inner: Socket,
    decode_header: bool,
    _phantom: PhantomData<M>,
}

impl<M> fmt::Debug for IcmpEcho<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IcmpEcho")
            .field("_phantom", &self._phantom)
            .finish()
    }
}

impl<P: Proto> IcmpEcho<P> {
    async fn request<'a>(&self, destination: IpAddr, req: &EchoRequest<'a>) -> io::Result<()>
    where
        EchoRequest<'a>: Encode<P>,
    {
        let target = SocketAddr::new(destination, 0);
        let mut buf: EchoRequestBuffer = [0; ECHO_REQUEST_BUFFER_SIZE];

        <_ as Encode<P>>::encode(req, &mut buf[..])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        trace!(?target, seq_cnt = ?req.seq_cnt, payload = ?req.payload, "encoded echo request");
        self.inner.send_to(&buf, &target).await?;
        if target.is_ipv4() {
            netkit_core::metrics::ICMPV4_REQUEST_COUNT.inc();
        } else {
            netkit_core::metrics::ICMPV6_REQUEST_COUNT.inc();
        }
        Ok(())
    }

    /// not cancel-safe
    async fn reply(&self) -> io::Result<(EchoReply, SocketAddr)>
    where
        EchoReply: Decode<P>,
    {
        let mut buf = [0; 1024];
        loop {
            let (n, addr) = self.inner.recv(&mut buf).await?;
            trace!(buf = ?&buf[..n], ?addr, "received data on socket");
            if let Ok(payload) = <EchoReply as Decode<P>>::decode(&buf[..n], self.decode_header) {
                if addr.is_ipv4() {
                    netkit_core::metrics::ICMPV4_REPLY_COUNT.inc();
                } else {
                    netkit_core::metrics::ICMPV6_REPLY_COUNT.inc();
                }
                return Ok((payload, addr));
            }
        }
    }
}

impl IcmpEcho<Icmpv4> {
    fn new() -> io::Result<Self> {
        let (inner, decode_header) = match Socket::new(Domain::IPV4, Type::DGRAM, Protocol::ICMPV4)
        {
            Ok(s) => (s, false),
            Err(err) => {
                error!(
                    ?err,
                    "error building DGRAM socket, check ping_group_range; trying RAW socket"
                );
                (
                    Socket::new(Domain::IPV4, Type::RAW, Protocol::ICMPV4)?,
                    true,
                )
            }
        };
        debug!("created new icmpv4 socket");
        Ok(Self {
            inner,
            decode_header,
            _phantom: PhantomData,
        })
    }
}

impl IcmpEcho<Icmpv6> {
    fn new() -> io::Result<Self> {
        let (inner, decode_header) = match Socket::new(Domain::IPV6, Type::DGRAM, Protocol::ICMPV6)
        {
            Ok(s) => (s, false),
            Err(err) => {
                warn!(
                    ?err,
                    "error building DGRAM socket, check ping_group_range; trying RAW socket"
                );
                (
                    Socket::new(Domain::IPV6, Type::RAW, Protocol::ICMPV6)?,
                    true,
                )
            }
        };
        debug!("created new icmpv6 socket");
        Ok(Self {
            inner,
            decode_header,
            _phantom: PhantomData,
        })
    }
}

/// local variable whose `Drop` guarantees the pending map is cleaned up
/// even if the owning future is cancelled before it observes a terminal
/// status
struct Guard {
    map: PendingMap,
    key: Key,
}

impl Drop for Guard {
    fn drop(&mut self) {
        self.map.lock().remove(&self.key);
    }
}

fn record_reply_metric(is_ipv4: bool, start: Instant) {
    let elapsed = start.elapsed().as_secs_f64();
    if is_ipv4 {
        netkit_core::metrics::ICMPV4_REPLY_DURATION
            .with_label_values(&["reply"])
            .observe(elapsed);
    } else {
        netkit_core::metrics::ICMPV6_REPLY_DURATION
            .with_label_values(&["reply"])
            .observe(elapsed);
    }
}

/// one address family's socket, reply-listener task, and pending-probe
/// bookkeeping. `Engine` owns one of these per family.
struct Family<M> {
    socket: Arc<IcmpEcho<M>>,
    pending: PendingMap,
    seq: AtomicU16,
    // dropping this ends the reply-listener task and cancels every
    // still-pending probe
    notify_shutdown: broadcast::Sender<()>,
}

impl<M> fmt::Debug for Family<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Family").finish_non_exhaustive()
    }
}

impl<M> Drop for Family<M> {
    fn drop(&mut self) {
        debug!("ICMP engine family shutting down");
    }
}

macro_rules! impl_family {
    ($t:ty) => {
        impl Family<$t> {
            fn new() -> Result<Self> {
                let socket = Arc::new(IcmpEcho::<$t>::new()?);
                let (notify_shutdown, _) = broadcast::channel(1);
                let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

                let listener_socket = socket.clone();
                let listener_pending = pending.clone();
                let mut shutdown = Shutdown::new(notify_shutdown.subscribe());
                task::spawn(async move {
                    loop {
                        tokio::select! {
                            ret = listener_socket.reply() => {
                                if let Ok((reply, addr)) = ret {
                                    let key = (reply.seq_cnt, reply.payload);
                                    if let Some(tx) = listener_pending.lock().remove(&key) {
                                        debug!(?addr, seq_cnt = reply.seq_cnt, "matched echo reply");
                                        let _ = tx.send(reply);
                                    } else {
                                        trace!(?addr, seq_cnt = reply.seq_cnt, "reply for unknown or already-completed probe");
                                    }
                                }
                            }
                            _ = shutdown.recv() => {
                                debug!("ICMP engine shutdown received, cancelling pending probes");
                                // dropping every sender delivers RecvError to each
                                // waiting ping(), which maps it to Status::Canceled
                                listener_pending.lock().clear();
                                break;
                            }
                        }
                    }
                });

                Ok(Self {
                    socket,
                    pending,
                    seq: AtomicU16::new(0),
                    notify_shutdown,
                })
            }
        }
    };
}

impl_family!(Icmpv4);
impl_family!(Icmpv6);

impl<P: Proto> Family<P>
where
    for<'a> EchoRequest<'a>: Encode<P>,
    EchoReply: Decode<P>,
{
    async fn ping(&self, destination: IpAddr, timeout: Duration, label: Option<String>) -> ProbeOutcome {
        let seq_cnt = self.seq.fetch_add(1, Ordering::Relaxed);
        let payload: Payload = rand::random();
        let mut outcome = ProbeOutcome::scheduled(destination, seq_cnt, payload, label);

        let (tx, rx) = oneshot::channel();
        let key = (seq_cnt, payload);
        self.pending.lock().insert(key, tx);
        let guard = Guard {
            map: self.pending.clone(),
            key,
        };

        let req = EchoRequest {
            ident: 0,
            seq_cnt,
            payload: &payload,
        };
        if let Err(err) = self.socket.request(destination, &req).await {
            debug!(?err, seq_cnt, "send failed, probe unreachable");
            drop(guard);
            outcome.finish(Status::Unreachable);
            return outcome;
        }
        outcome.pending();
        debug!(seq_cnt, ?payload, "echo request sent, awaiting reply");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => {
                drop(guard);
                record_reply_metric(destination.is_ipv4(), outcome.start);
                debug_assert!(reply == req, "listener delivered a reply under the wrong key");
                outcome.finish(Status::Success);
            }
            Ok(Err(_recv_error)) => {
                drop(guard);
                debug!(seq_cnt, "probe cancelled (engine shutdown)");
                outcome.finish(Status::Canceled);
            }
            Err(_elapsed) => {
                drop(guard);
                debug!(seq_cnt, ?timeout, "probe timed out");
                outcome.finish(Status::Timeout);
            }
        }
        outcome
    }
}

/// top-level ICMP probing engine: owns one DGRAM/RAW socket per address
/// family and the reply-listener task for each.
#[derive(Debug)]
pub struct Engine {
    v4: Family<Icmpv4>,
    v6: Family<Icmpv6>,
}

impl Engine {
    /// build both the IPv4 and IPv6 sockets and start their listener
    /// tasks. Fails only if socket creation itself fails (e.g. no
    /// permission for either DGRAM or RAW ICMP sockets).
    pub fn new() -> Result<Self> {
        Ok(Self {
            v4: Family::<Icmpv4>::new()?,
            v6: Family::<Icmpv6>::new()?,
        })
    }

    /// send one ECHO_REQUEST to `destination` and await its terminal
    /// outcome. Never returns an `Err`: failure modes are represented
    /// as terminal [`Status`] values on the returned [`ProbeOutcome`].
    pub async fn ping(
        &self,
        destination: IpAddr,
        timeout: Duration,
        label: Option<String>,
    ) -> ProbeOutcome {
        match destination {
            IpAddr::V4(_) => self.v4.ping(destination, timeout, label).await,
            IpAddr::V6(_) => self.v6.ping(destination, timeout, label).await,
        }
    }

    /// signal both listener tasks to stop. Every still-pending probe
    /// observes a [`Status::Canceled`] terminal transition; new probes
    /// may still be started afterwards, but will themselves be
    /// cancelled immediately since the listener tasks have exited and
    /// will never deliver a reply.
    pub fn shutdown(&self) {
        let _ = self.v4.notify_shutdown.send(());
        let _ = self.v6.notify_shutdown.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn ping_loopback_v4_succeeds() {
        let engine = Engine::new().expect("engine requires ICMP socket permissions");
        let outcome = engine
            .ping("127.0.0.1".parse().unwrap(), Duration::from_secs(1), None)
            .await;
        assert_eq!(outcome.status, Status::Success);
        assert!(outcome.elapsed().is_some());
    }

    // The CI environment this was written for does not support ICMPv6.
    // #[tokio::test]
    // async fn ping_loopback_v6_succeeds() { ... }

    #[tokio::test]
    #[traced_test]
    async fn unreachable_timeout_has_no_reply_status() {
        let engine = Engine::new().expect("engine requires ICMP socket permissions");
        // TEST-NET-1 address space, reserved for documentation; routers
        // should not forward it, so no reply arrives before the timeout
        let outcome = engine
            .ping(
                "192.0.2.1".parse().unwrap(),
                Duration::from_millis(50),
                Some("probe-doc".into()),
            )
            .await;
        assert_eq!(outcome.status, Status::Timeout);
        assert_eq!(outcome.label.as_deref(), Some("probe-doc"));
    }

    #[tokio::test]
    #[traced_test]
    async fn concurrent_pings_do_not_cross_correlate() {
        let engine = Arc::new(Engine::new().expect("engine requires ICMP socket permissions"));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .ping("127.0.0.1".parse().unwrap(), Duration::from_secs(1), None)
                    .await
            }));
        }
        for handle in handles {
            let outcome = handle.await.unwrap();
            assert_eq!(outcome.status, Status::Success);
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn shutdown_cancels_in_flight_probes() {
        let engine = Arc::new(Engine::new().expect("engine requires ICMP socket permissions"));
        let probe = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .ping("192.0.2.1".parse().unwrap(), Duration::from_secs(5), None)
                    .await
            })
        };
        // give the probe a moment to register itself in the pending map
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine.shutdown();
        let outcome = probe.await.unwrap();
        assert_eq!(outcome.status, Status::Canceled);
    }
}
