use thiserror::Error;

use crate::hub::ConnectionId;

/// Unified error type for the Wavehub application
#[derive(Error, Debug)]
pub enum HubError {
    // Registry errors
    #[error("Connection already registered: {id}")]
    AlreadyRegistered { id: ConnectionId },

    // Connection errors
    #[error("Connection closed: {id}")]
    ConnectionClosed { id: ConnectionId },

    #[error("Write to {id} timed out after {timeout_ms}ms")]
    WriteTimeout { id: ConnectionId, timeout_ms: u64 },

    #[error("Failed to decode frame: {0}")]
    Decode(String),

    // Broadcast channel errors
    #[error("Broadcast channel closed")]
    ChannelClosed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Wavehub operations
pub type Result<T> = std::result::Result<T, HubError>;

impl HubError {
    /// Errors that only concern a single peer. They end that peer's session
    /// and never propagate to the dispatcher or other connections.
    pub fn is_connection_scoped(&self) -> bool {
        matches!(
            self,
            HubError::ConnectionClosed { .. } | HubError::WriteTimeout { .. } | HubError::Decode(_)
        )
    }
}

// WebSocket transport errors surface as I/O failures of one connection
impl From<axum::Error> for HubError {
    fn from(err: axum::Error) -> Self {
        HubError::Io(std::io::Error::new(std::io::ErrorKind::Other, err))
    }
}
