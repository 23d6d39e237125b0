//! Error types for the media layer

use thiserror::Error;

/// Media processing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The playout clock was started twice
    #[error("Playout clock already running")]
    AlreadyRunning,

    /// An operation required a running playout clock
    #[error("Playout clock not running")]
    NotRunning,

    /// The playout thread could not be created
    #[error("Failed to spawn playout thread")]
    ThreadSpawn,

    /// A frame had an unusable length
    #[error("Invalid frame length {actual}, expected {expected}")]
    InvalidFrameLength {
        /// Observed payload length
        actual: usize,
        /// Required payload length
        expected: usize,
    },
}

/// Result type for media operations
pub type Result<T> = std::result::Result<T, Error>;
