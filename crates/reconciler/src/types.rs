//! Core types for the reconciler.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vigil_events::SessionKey;

use crate::remote::TargetId;

/// Display state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    /// Authenticated, first cycle not yet finished.
    Active,
    /// Last cycle succeeded.
    Protecting,
    /// Last cycle failed.
    Reconnecting,
}

impl HealthStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Protecting => "PROTECTING",
            Self::Reconnecting => "RECONNECTING",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Liveness of the authentication material behind a session's handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialHealth {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "INVALID/EXPIRED")]
    InvalidOrExpired,
    #[serde(rename = "RATE-LIMITED")]
    RateLimited,
}

impl CredentialHealth {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::InvalidOrExpired => "INVALID/EXPIRED",
            Self::RateLimited => "RATE-LIMITED",
        }
    }
}

impl fmt::Display for CredentialHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a session enforces on its target. `None` means "do not enforce".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredConfig {
    pub name: Option<String>,
    pub label: Option<String>,
}

impl DesiredConfig {
    /// Build a desired configuration, treating empty strings as absent.
    pub fn new(name: Option<String>, label: Option<String>) -> Self {
        Self {
            name: non_empty(name),
            label: non_empty(label),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Operator-controlled settings of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub target: TargetId,
    pub desired: DesiredConfig,
    /// Seconds between cycles, already defaulted and clamped.
    pub cadence_secs: u64,
}

impl SessionSettings {
    pub fn cadence(&self) -> Duration {
        Duration::from_secs(self.cadence_secs)
    }
}

/// Read-only projection of a session record for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_key: SessionKey,
    pub target_id: TargetId,
    pub desired_name: Option<String>,
    pub desired_label: Option<String>,
    pub cadence_secs: u64,
    pub credentials: String,
    pub health: HealthStatus,
    pub credential_health: CredentialHealth,
    pub consecutive_failures: u32,
    pub running: bool,
    pub created_at: DateTime<Utc>,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

/// How a cycle was classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Fetch and name correction succeeded.
    Success,
    /// Fetch or name correction failed.
    Failure { reason: String },
}

/// Corrections applied during one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Corrections {
    pub name_corrected: bool,
    pub label_attempts: usize,
    pub label_failures: usize,
}

impl Corrections {
    /// One-line summary for the per-cycle event.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if self.name_corrected {
            parts.push("name restored".to_string());
        }
        if self.label_attempts > 0 {
            let restored = self.label_attempts.saturating_sub(self.label_failures);
            parts.push(format!(
                "{restored}/{} member labels restored",
                self.label_attempts
            ));
        }
        if parts.is_empty() {
            "protecting: no drift".to_string()
        } else {
            format!("protecting: {}", parts.join(", "))
        }
    }
}

/// Result of one cycle, as seen by the loop driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub corrections: Corrections,
    pub consecutive_failures: u32,
    /// Delay before the next cycle. `None` when the loop was superseded or
    /// terminated during the cycle and must not reschedule.
    pub next_delay: Option<Duration>,
}

impl CycleReport {
    pub fn is_success(&self) -> bool {
        self.outcome == CycleOutcome::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_desired_values_are_absent() {
        let desired = DesiredConfig::new(Some(String::new()), Some("  ".to_string()));
        assert_eq!(desired, DesiredConfig::default());

        let desired = DesiredConfig::new(Some("Alpha".to_string()), None);
        assert_eq!(desired.name.as_deref(), Some("Alpha"));
        assert!(desired.label.is_none());
    }

    #[test]
    fn health_names_serialize_as_displayed() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Protecting).ok().as_deref(),
            Some("\"PROTECTING\"")
        );
        assert_eq!(
            serde_json::to_string(&CredentialHealth::InvalidOrExpired)
                .ok()
                .as_deref(),
            Some("\"INVALID/EXPIRED\"")
        );
        assert_eq!(CredentialHealth::RateLimited.to_string(), "RATE-LIMITED");
    }

    #[test]
    fn corrections_summary() {
        assert_eq!(Corrections::default().describe(), "protecting: no drift");
        let corrections = Corrections {
            name_corrected: true,
            label_attempts: 2,
            label_failures: 1,
        };
        assert_eq!(
            corrections.describe(),
            "protecting: name restored, 1/2 member labels restored"
        );
    }
}
