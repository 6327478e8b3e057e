use thiserror::Error;

/// errors produced while running an NDT7 test or server
#[derive(Debug, Error)]
pub enum Error {
    /// the target URL was not a well-formed `ws://`/`wss://` endpoint
    #[error("invalid measurement server url `{url}`: {source}")]
    InvalidUrl {
        /// the offending URL
        url: String,
        /// underlying parse failure
        #[source]
        source: url::ParseError,
    },
    /// the WebSocket handshake or an in-test frame exchange failed
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    /// a measurement frame did not decode as the expected JSON shape
    #[error("failed to parse measurement frame: {0}")]
    MeasurementParse(#[from] serde_json::Error),
    /// the test did not complete within its deadline
    #[error("test timed out after {0:?}")]
    Timeout(std::time::Duration),
    /// the server rejected the request path (not `/ndt/v7/download` or
    /// `/ndt/v7/upload`)
    #[error("unrecognized ndt7 path `{0}`")]
    UnrecognizedPath(String),
}

/// convenience alias
pub type Result<T> = std::result::Result<T, Error>;
