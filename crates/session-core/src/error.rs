//! Error types for session orchestration

use thiserror::Error;

/// Session-level errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The realtime transport failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// The media layer failed
    #[error("Media error: {0}")]
    Media(String),

    /// The session is already shut down
    #[error("Session ended")]
    SessionEnded,
}

impl From<ridebridge_realtime_core::Error> for Error {
    fn from(err: ridebridge_realtime_core::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<ridebridge_media_core::Error> for Error {
    fn from(err: ridebridge_media_core::Error) -> Self {
        Error::Media(err.to_string())
    }
}

/// Result type for session operations
pub type Result<T> = std::result::Result<T, Error>;
