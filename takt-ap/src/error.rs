//! Error types for the audio player

use thiserror::Error;

/// Audio player errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation not valid in the current player state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Session lookup failure
    #[error("Session not found: {0}")]
    SessionNotFound(u64),

    /// File I/O error
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Shared library error
    #[error("Common error: {0}")]
    Common(#[from] takt_common::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for audio player operations
pub type Result<T> = std::result::Result<T, Error>;
