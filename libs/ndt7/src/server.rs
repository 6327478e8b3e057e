//! server role: an axum WebSocket endpoint speaking NDT7
//!
//! Only the two test paths are served; everything else answers 404, the
//! same way the reference server tells load balancers and crawlers this
//! is not a general-purpose HTTP endpoint.

use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::extract::ConnectInfo;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::errors::Error;
use crate::measurement::{ConnectionInfo, Role, Test};
use crate::session::{self, Frame, MeasurementPair, SessionConfig};

struct ServerSink(SplitSink<WebSocket, AxumMessage>);

impl Sink<Frame> for ServerSink {
    type Error = Error;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<crate::errors::Result<()>> {
        Pin::new(&mut self.0).poll_ready(cx).map_err(axum_err)
    }

    fn start_send(mut self: Pin<&mut Self>, item: Frame) -> crate::errors::Result<()> {
        let msg = match item {
            Frame::Text(s) => AxumMessage::Text(s),
            Frame::Binary(b) => AxumMessage::Binary(b.to_vec()),
        };
        Pin::new(&mut self.0).start_send(msg).map_err(axum_err)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<crate::errors::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx).map_err(axum_err)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<crate::errors::Result<()>> {
        Pin::new(&mut self.0).poll_close(cx).map_err(axum_err)
    }
}

struct ServerStream(SplitStream<WebSocket>);

impl Stream for ServerStream {
    type Item = crate::errors::Result<Frame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            return match Pin::new(&mut self.0).poll_next(cx) {
                Poll::Ready(Some(Ok(AxumMessage::Text(s)))) => Poll::Ready(Some(Ok(Frame::Text(s)))),
                Poll::Ready(Some(Ok(AxumMessage::Binary(b)))) => {
                    Poll::Ready(Some(Ok(Frame::Binary(Bytes::from(b)))))
                }
                Poll::Ready(Some(Ok(AxumMessage::Close(_)))) => Poll::Ready(None),
                Poll::Ready(Some(Ok(AxumMessage::Ping(_) | AxumMessage::Pong(_)))) => continue,
                Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(axum_err(e)))),
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            };
        }
    }
}

fn axum_err(e: axum::Error) -> Error {
    // axum's WebSocket error type doesn't implement the tungstenite error
    // trait tree `Error::WebSocket` expects; fold it into a protocol
    // error carrying the same message instead of widening the enum for
    // one call site.
    Error::MeasurementParse(<serde_json::Error as serde::de::Error>::custom(e.to_string()))
}

/// everything a handler needs to drive one accepted test connection
#[derive(Clone)]
pub struct ServerConfig {
    /// how long a single test is allowed to run before it is cut off
    pub deadline: Duration,
    /// where measurements produced by every accepted connection are sent;
    /// the caller is expected to fan these out to its statistics
    /// aggregator and/or index-log sink
    pub measurements: mpsc::Sender<(SocketAddr, MeasurementPair)>,
}

async fn run_test(
    socket: WebSocket,
    peer: SocketAddr,
    local: SocketAddr,
    direction: Test,
    cfg: ServerConfig,
) {
    let (sink, stream) = socket.split();
    let connection_info = ConnectionInfo {
        client: peer.to_string(),
        server: local.to_string(),
    };
    let session_cfg = SessionConfig {
        direction,
        role: Role::Server,
        deadline: cfg.deadline,
        connection_info: Some(connection_info),
    };

    let mut rx = session::run(ServerSink(sink), ServerStream(stream), session_cfg, None).await;
    while let Some(pair) = rx.recv().await {
        if cfg.measurements.send((peer, pair)).await.is_err() {
            break;
        }
    }
    trace!(%peer, ?direction, "ndt7 test connection finished");
}

async fn download_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    axum::extract::State((local, cfg)): axum::extract::State<(SocketAddr, ServerConfig)>,
) -> impl IntoResponse {
    ws.protocols([session::WEBSOCKET_SUBPROTOCOL])
        .on_upgrade(move |socket| run_test(socket, peer, local, Test::Download, cfg))
}

async fn upload_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    axum::extract::State((local, cfg)): axum::extract::State<(SocketAddr, ServerConfig)>,
) -> impl IntoResponse {
    ws.protocols([session::WEBSOCKET_SUBPROTOCOL])
        .on_upgrade(move |socket| run_test(socket, peer, local, Test::Upload, cfg))
}

/// the router an NDT7 server binds: `/ndt/v7/download` and
/// `/ndt/v7/upload`, everything else 404s
pub fn router(local_addr: SocketAddr, cfg: ServerConfig) -> Router {
    Router::new()
        .route("/ndt/v7/download", get(download_handler))
        .route("/ndt/v7/upload", get(upload_handler))
        .with_state((local_addr, cfg))
}

/// keeps the server's accept loop alive; dropping the guard aborts it
#[derive(Debug)]
pub struct ServerGuard {
    task: JoinHandle<()>,
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// bind and serve the NDT7 endpoints on `addr` until the returned guard
/// is dropped
pub async fn serve(addr: SocketAddr, cfg: ServerConfig) -> std::io::Result<ServerGuard> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let app = router(local_addr, cfg);
    debug!(%local_addr, "ndt7 server listening");
    let task = tokio::spawn(async move {
        if let Err(err) = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        {
            tracing::error!(%err, "ndt7 server accept loop exited");
        }
    });
    Ok(ServerGuard { task })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serve_and_shutdown_on_drop() {
        let (tx, _rx) = mpsc::channel(8);
        let cfg = ServerConfig {
            deadline: Duration::from_secs(5),
            measurements: tx,
        };
        let guard = serve("127.0.0.1:0".parse().unwrap(), cfg).await.unwrap();
        drop(guard);
    }
}
