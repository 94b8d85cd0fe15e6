//! Error types for the reconciler crate.

use std::time::Duration;

use thiserror::Error;
use vigil_events::SessionKey;

/// Result type alias for lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures reported by a remote account client or raised while waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Credential exchange was rejected.
    #[error("authentication failed: {reason}")]
    Auth { reason: String },

    /// Reading the target state failed.
    #[error("fetch failed: {reason}")]
    Fetch { reason: String },

    /// A corrective action was rejected.
    #[error("action '{action}' failed: {reason}")]
    Action { action: String, reason: String },

    /// The call did not finish within its bound.
    #[error("{operation} timed out after {}s", .limit.as_secs())]
    Timeout {
        operation: &'static str,
        limit: Duration,
    },
}

impl RemoteError {
    /// Create an authentication error.
    pub fn auth(reason: impl Into<String>) -> Self {
        Self::Auth {
            reason: reason.into(),
        }
    }

    /// Create a fetch error.
    pub fn fetch(reason: impl Into<String>) -> Self {
        Self::Fetch {
            reason: reason.into(),
        }
    }

    /// Create an action error.
    pub fn action(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Action {
            action: action.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    pub const fn timeout(operation: &'static str, limit: Duration) -> Self {
        Self::Timeout { operation, limit }
    }
}

/// Lifecycle controller errors returned to operators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Credential exchange failed; no loop was started.
    #[error("authentication failed for session '{session_key}': {reason}")]
    Auth {
        session_key: SessionKey,
        reason: String,
    },

    /// No record exists for the key.
    #[error("session '{session_key}' not found")]
    SessionNotFound { session_key: SessionKey },

    /// The request cannot describe a session.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },
}

impl Error {
    /// Create an authentication error.
    pub fn auth(session_key: &SessionKey, reason: impl Into<String>) -> Self {
        Self::Auth {
            session_key: session_key.clone(),
            reason: reason.into(),
        }
    }

    /// Create a session not found error.
    pub fn session_not_found(session_key: &SessionKey) -> Self {
        Self::SessionNotFound {
            session_key: session_key.clone(),
        }
    }

    /// Create an invalid request error.
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }
}
