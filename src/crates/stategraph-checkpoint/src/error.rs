//! Error types for channel and checkpoint operations.

use thiserror::Error;

/// Convenience result type using [`CheckpointError`].
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors raised by channels and checkpoint savers.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// A channel was read before it ever received a value.
    #[error("channel '{0}' is empty")]
    EmptyChannel(String),

    /// A sequence of writes violated a channel's merge rule, e.g. two
    /// writes to an exclusive channel within one step.
    #[error("invalid update for channel '{channel}': {reason}")]
    InvalidUpdate {
        /// Channel that rejected the writes.
        channel: String,
        /// Why the writes were rejected.
        reason: String,
    },

    /// A saver operation was called without a required config field.
    #[error("missing config field: {0}")]
    MissingConfig(&'static str),

    /// The requested thread or checkpoint does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A channel snapshot could not be restored.
    #[error("corrupt channel snapshot for '{channel}': {reason}")]
    CorruptSnapshot {
        /// Channel whose snapshot failed to restore.
        channel: String,
        /// Why restoration failed.
        reason: String,
    },

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend-specific storage failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl CheckpointError {
    /// Shorthand for an [`CheckpointError::InvalidUpdate`].
    pub fn invalid_update(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUpdate {
            channel: channel.into(),
            reason: reason.into(),
        }
    }
}
