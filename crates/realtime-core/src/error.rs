//! Error types for the realtime transport layer

use thiserror::Error;

/// Realtime transport errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The send lane is closed (socket gone or disposed)
    #[error("Not connected")]
    NotConnected,

    /// The WebSocket layer failed
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// A connection header could not be constructed
    #[error("Invalid header {name}")]
    InvalidHeader {
        /// Header name that failed to parse
        name: String,
    },

    /// A payload failed to serialize
    #[error("Serialization error: {0}")]
    Serialize(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialize(err.to_string())
    }
}

/// Result type for realtime operations
pub type Result<T> = std::result::Result<T, Error>;
