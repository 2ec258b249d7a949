use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by the RPC client.
///
/// Cloneable so a single failure can be delivered to every pending waiter.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("server process exited")]
    ServerExited,

    #[error("server is not running")]
    NotRunning,

    #[error("client was stopped")]
    Stopped,

    #[error("failed to start server: {0}")]
    Startup(String),

    #[error("server error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("invalid JSON: {0}")]
    Json(String),
}

impl TransportError {
    /// True when the backend process is gone or unreachable and a restart
    /// is the only way forward.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            TransportError::ServerExited
                | TransportError::NotRunning
                | TransportError::Stopped
                | TransportError::Io(_)
        )
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Json(err.to_string())
    }
}
