//! Transport errors.

use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors raised by a socket's I/O task.
///
/// They never escape to callers. The socket reports them as an error signal
/// followed by an abnormal close.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The handshake did not finish in time.
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    /// WebSocket protocol or I/O failure.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// The socket was opened outside a tokio runtime.
    #[error("No tokio runtime available")]
    NoRuntime,

    /// The peer went away without a close frame.
    #[error("Connection lost")]
    ConnectionLost,
}
