//! client role: connect to a measurement server and drive one test

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::errors::{Error, Result};
use crate::measurement::{Role, Test};
use crate::session::{self, Frame, MeasurementPair, SessionConfig, TcpInfoFn, WEBSOCKET_SUBPROTOCOL};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct ClientSink(SplitSink<WsStream, Message>);

impl Sink<Frame> for ClientSink {
    type Error = Error;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        Pin::new(&mut self.0).poll_ready(cx).map_err(Error::WebSocket)
    }

    fn start_send(mut self: Pin<&mut Self>, item: Frame) -> Result<()> {
        let msg = match item {
            Frame::Text(s) => Message::Text(s),
            Frame::Binary(b) => Message::Binary(b.to_vec()),
        };
        Pin::new(&mut self.0).start_send(msg).map_err(Error::WebSocket)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx).map_err(Error::WebSocket)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        Pin::new(&mut self.0).poll_close(cx).map_err(Error::WebSocket)
    }
}

struct ClientStream(SplitStream<WsStream>);

impl Stream for ClientStream {
    type Item = Result<Frame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            return match Pin::new(&mut self.0).poll_next(cx) {
                Poll::Ready(Some(Ok(Message::Text(s)))) => Poll::Ready(Some(Ok(Frame::Text(s)))),
                Poll::Ready(Some(Ok(Message::Binary(b)))) => {
                    Poll::Ready(Some(Ok(Frame::Binary(Bytes::from(b)))))
                }
                Poll::Ready(Some(Ok(Message::Close(_)))) => Poll::Ready(None),
                Poll::Ready(Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)))) => {
                    continue
                }
                Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(Error::WebSocket(e)))),
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            };
        }
    }
}

/// builds the per-direction test URL by forcing a `ws`/`wss` scheme and
/// resolving `ndt/v7/{download,upload}` against it as a relative
/// reference (replacing the last path segment, not appending to it),
/// preserving the base URL's query string (measurement servers hand out
/// locate tokens this way)
pub fn test_url(base: &Url, direction: Test) -> Result<Url> {
    let mut scheme_url = base.clone();
    let scheme = match scheme_url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => other,
    };
    scheme_url
        .set_scheme(scheme)
        .map_err(|_| Error::InvalidUrl {
            url: base.to_string(),
            source: url::ParseError::EmptyHost,
        })?;
    let suffix = match direction {
        Test::Download => "download",
        Test::Upload => "upload",
    };
    let mut url = scheme_url
        .join(&format!("ndt/v7/{suffix}"))
        .map_err(|source| Error::InvalidUrl { url: base.to_string(), source })?;
    url.set_query(scheme_url.query());
    Ok(url)
}

/// a connection to a single NDT7 measurement server
#[derive(Debug, Clone)]
pub struct Client {
    base_url: Url,
}

impl Client {
    /// a client targeting `base_url`, as handed out by the locate service
    /// (scheme is normalized to `ws`/`wss` regardless of what's given)
    pub fn new(base_url: Url) -> Self {
        Self { base_url }
    }

    /// run one direction of the test against this server, returning a
    /// channel of measurements as they arrive. The request URL is
    /// derived from this client's base URL by forcing a `ws`/`wss`
    /// scheme and appending `/ndt/v7/{download,upload}`.
    pub async fn test(&self, direction: Test, deadline: Duration) -> Result<mpsc::Receiver<MeasurementPair>> {
        let url = test_url(&self.base_url, direction)?;
        connect(&url, direction, deadline).await
    }
}

/// run one direction of the test against an already-complete request
/// URL, e.g. one handed out verbatim by the locate service (each
/// subtest gets its own access-token query string, so it cannot be
/// derived from a shared base the way [`Client::test`] does).
pub async fn run_at(url: &Url, direction: Test, deadline: Duration) -> Result<mpsc::Receiver<MeasurementPair>> {
    connect(url, direction, deadline).await
}

/// a closure sampling `TCP_INFO` off the connection's raw socket, when
/// one is reachable. Only the `Plain` (unencrypted `ws://`) variant of
/// `MaybeTlsStream` exposes a raw file descriptor this way; a TLS-wrapped
/// `wss://` connection has no such handle without reaching into
/// `rustls`'s internals, so those sessions fall back to the `AppInfo`
/// byte-count rate wherever a `TCPInfo` rate would otherwise be used.
#[cfg(target_os = "linux")]
fn tcp_info_fn_for(stream: &MaybeTlsStream<TcpStream>) -> Option<TcpInfoFn> {
    use std::os::unix::io::AsRawFd;
    match stream {
        MaybeTlsStream::Plain(tcp) => {
            let fd = tcp.as_raw_fd();
            Some(Box::new(move || tcpinfo::snapshot_by_fd(fd)) as TcpInfoFn)
        }
        _ => None,
    }
}

#[cfg(not(target_os = "linux"))]
fn tcp_info_fn_for(_stream: &MaybeTlsStream<TcpStream>) -> Option<TcpInfoFn> {
    None
}

async fn connect(url: &Url, direction: Test, deadline: Duration) -> Result<mpsc::Receiver<MeasurementPair>> {
    let mut request = url.as_str().into_client_request()?;
    request.headers_mut().insert(
        header::SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static(WEBSOCKET_SUBPROTOCOL),
    );
    request
        .headers_mut()
        .insert(header::USER_AGENT, HeaderValue::from_static(session::USER_AGENT));

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request).await?;
    let tcp_info_fn = tcp_info_fn_for(ws_stream.get_ref());
    let (sink, stream) = ws_stream.split();

    let cfg = SessionConfig {
        direction,
        role: Role::Client,
        deadline,
        connection_info: None,
    };

    Ok(session::run(ClientSink(sink), ClientStream(stream), cfg, tcp_info_fn).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_forces_websocket_scheme_and_appends_path() {
        let base: Url = "https://ndt-1.example.com/?locate=token".parse().unwrap();
        let download = test_url(&base, Test::Download).unwrap();
        assert_eq!(download.scheme(), "wss");
        assert_eq!(download.path(), "/ndt/v7/download");
        assert_eq!(download.query(), Some("locate=token"));

        let upload = test_url(&base, Test::Upload).unwrap();
        assert_eq!(upload.path(), "/ndt/v7/upload");
    }

    #[test]
    fn test_url_replaces_the_last_path_segment_rather_than_appending() {
        let base: Url = "https://host/x?y=1".parse().unwrap();
        let download = test_url(&base, Test::Download).unwrap();
        assert_eq!(download, "wss://host/ndt/v7/download?y=1".parse().unwrap());
    }
}
