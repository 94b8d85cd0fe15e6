//! Error types for the events crate.

use thiserror::Error;

/// Result type alias for event operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Event error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The broadcaster evicted this observer or was dropped.
    #[error("event channel closed")]
    ChannelClosed,

    /// No event is waiting in the observer queue.
    #[error("no event available")]
    Empty,

    /// A session key failed validation.
    #[error("invalid session key '{value}'")]
    InvalidSessionKey { value: String },
}

impl Error {
    /// Create an invalid session key error.
    pub fn invalid_session_key(value: impl Into<String>) -> Self {
        Self::InvalidSessionKey {
            value: value.into(),
        }
    }
}
