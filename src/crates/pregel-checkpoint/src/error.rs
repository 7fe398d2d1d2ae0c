//! Error types for channel updates and checkpoint persistence

use thiserror::Error;

/// Result type for checkpoint and channel operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors raised by channels and checkpoint savers
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Checkpoint (or thread) not found
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Malformed checkpoint, config or channel blob
    #[error("Invalid checkpoint: {0}")]
    Invalid(String),

    /// Read of a channel that has nothing available
    #[error("Empty channel: {0}")]
    EmptyChannel(String),

    /// A write that violates the channel's update rule
    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Custom error
    #[error("{0}")]
    Custom(String),
}

impl Clone for CheckpointError {
    /// Source errors that are not `Clone` are rebuilt from their message
    fn clone(&self) -> Self {
        match self {
            Self::NotFound(id) => Self::NotFound(id.clone()),
            Self::Serialization(error) => {
                Self::Serialization(serde::de::Error::custom(error.to_string()))
            }
            Self::Storage(message) => Self::Storage(message.clone()),
            Self::Invalid(message) => Self::Invalid(message.clone()),
            Self::EmptyChannel(channel) => Self::EmptyChannel(channel.clone()),
            Self::InvalidUpdate(message) => Self::InvalidUpdate(message.clone()),
            Self::Io(error) => Self::Io(std::io::Error::new(error.kind(), error.to_string())),
            Self::Custom(message) => Self::Custom(message.clone()),
        }
    }
}

impl CheckpointError {
    /// Whether this error is a channel read of an unavailable value
    pub fn is_empty_channel(&self) -> bool {
        matches!(self, CheckpointError::EmptyChannel(_))
    }
}
