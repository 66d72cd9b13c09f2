//! Realtime adapter error types.

use std::time::Duration;

use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue;
use voxline_app::ports::TransportError;

/// Errors specific to the realtime channel.
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    /// No session is open.
    #[error("realtime channel not connected")]
    NotConnected,

    /// The handshake or the socket failed.
    #[error("websocket error: {0}")]
    WebSocket(#[source] Box<tungstenite::Error>),

    /// The bearer credential cannot be sent as a header.
    #[error("invalid bearer credential")]
    InvalidCredential(#[from] InvalidHeaderValue),

    #[error("failed to encode message")]
    Encode(#[from] serde_json::Error),

    /// The backend did not acknowledge a request in time.
    #[error("no acknowledgement within {0:?}")]
    Timeout(Duration),
}

impl From<tungstenite::Error> for RealtimeError {
    fn from(err: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl From<RealtimeError> for TransportError {
    fn from(err: RealtimeError) -> Self {
        match err {
            RealtimeError::NotConnected => Self::NotConnected,
            other => Self::ConnectionLost(other.to_string()),
        }
    }
}
