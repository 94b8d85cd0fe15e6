//! Session status events.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{EventId, SessionKey, Severity};

/// One status or log line about a session, as seen by observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub event_id: EventId,
    pub session_key: SessionKey,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

impl SessionEvent {
    /// Create an event stamped with the current time.
    pub fn new(session_key: SessionKey, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            event_id: EventId::new(),
            session_key,
            message: message.into(),
            severity,
            timestamp: Utc::now(),
        }
    }

    /// Create an informational event.
    pub fn info(session_key: SessionKey, message: impl Into<String>) -> Self {
        Self::new(session_key, message, Severity::Info)
    }

    /// Create an error event.
    pub fn error(session_key: SessionKey, message: impl Into<String>) -> Self {
        Self::new(session_key, message, Severity::Error)
    }

    /// Check whether this event reports a failure.
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.session_key, self.message)
    }
}
