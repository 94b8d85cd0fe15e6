//! Per-session reconciliation loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use vigil_core::SupervisorSection;
use vigil_events::{EventBroadcaster, SessionKey, Severity};

use crate::error::RemoteError;
use crate::registry::SessionRegistry;
use crate::remote::{AccountHandle, TargetState};
use crate::types::{
    Corrections, CredentialHealth, CycleOutcome, CycleReport, HealthStatus, SessionSettings,
};

/// Timing policy shared by every session loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// Floor applied to every requested cadence.
    pub min_cadence: Duration,
    /// Cadence used when none (or zero) is requested.
    pub default_cadence: Duration,
    /// Fixed delay once failures exceed the threshold.
    pub retry_delay: Duration,
    /// Failures tolerated before switching to `retry_delay`.
    pub failure_threshold: u32,
    pub fetch_timeout: Duration,
    pub action_timeout: Duration,
    pub auth_timeout: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::from(&SupervisorSection::default())
    }
}

impl From<&SupervisorSection> for LoopConfig {
    fn from(section: &SupervisorSection) -> Self {
        Self {
            min_cadence: Duration::from_secs(section.min_cadence_secs),
            default_cadence: Duration::from_secs(section.default_cadence_secs),
            retry_delay: Duration::from_secs(section.retry_delay_secs),
            failure_threshold: section.failure_threshold,
            fetch_timeout: Duration::from_secs(section.fetch_timeout_secs),
            action_timeout: Duration::from_secs(section.action_timeout_secs),
            auth_timeout: Duration::from_secs(section.auth_timeout_secs),
        }
    }
}

impl LoopConfig {
    /// Default a missing or zero cadence, then apply the floor.
    pub fn resolve_cadence(&self, requested_secs: Option<u64>) -> u64 {
        requested_secs
            .filter(|secs| *secs > 0)
            .unwrap_or(self.default_cadence.as_secs())
            .max(self.min_cadence.as_secs())
    }

    /// Delay before the next cycle: the retry delay once failures exceed the
    /// threshold, the cadence otherwise.
    pub fn next_delay(&self, consecutive_failures: u32, cadence: Duration) -> Duration {
        if consecutive_failures > self.failure_threshold {
            self.retry_delay
        } else {
            cadence
        }
    }
}

/// Handle to stop a session loop.
///
/// Stopping interrupts the delay between cycles. A cycle in flight runs to
/// completion and then exits without rescheduling.
#[derive(Debug, Clone)]
pub struct LoopStopper {
    stop_tx: watch::Sender<bool>,
}

impl LoopStopper {
    /// Create a stopper and the receiver its loop listens on.
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (stop_tx, stop_rx) = watch::channel(false);
        (Self { stop_tx }, stop_rx)
    }

    /// Stop the loop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Drives one session: fetch, correct drift, update health, reschedule.
///
/// The loop exclusively owns its account handle. It only writes to the
/// registry, and only emits events, while its generation is current.
pub struct SessionLoop {
    key: SessionKey,
    generation: u64,
    handle: Box<dyn AccountHandle>,
    registry: Arc<SessionRegistry>,
    events: Arc<EventBroadcaster>,
    config: LoopConfig,
    stop_rx: watch::Receiver<bool>,
}

impl SessionLoop {
    pub fn new(
        key: SessionKey,
        generation: u64,
        handle: Box<dyn AccountHandle>,
        registry: Arc<SessionRegistry>,
        events: Arc<EventBroadcaster>,
        config: LoopConfig,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            key,
            generation,
            handle,
            registry,
            events,
            config,
            stop_rx,
        }
    }

    /// Run cycles until stopped, superseded or terminated.
    pub async fn run(mut self) {
        info!(
            session_key = %self.key,
            generation = self.generation,
            "Starting session loop"
        );

        loop {
            if *self.stop_rx.borrow() {
                break;
            }
            let Some(report) = self.run_cycle().await else {
                break;
            };
            let Some(delay) = report.next_delay else {
                break;
            };
            debug!(
                session_key = %self.key,
                generation = self.generation,
                consecutive_failures = report.consecutive_failures,
                delay_secs = delay.as_secs(),
                "Next cycle scheduled"
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                changed = self.stop_rx.changed() => {
                    if changed.is_err() || *self.stop_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!(
            session_key = %self.key,
            generation = self.generation,
            "Session loop stopped"
        );
    }

    /// Run a single cycle.
    ///
    /// Returns `None` without touching the remote when the record is absent,
    /// stopped, or owned by a newer generation.
    pub async fn run_cycle(&self) -> Option<CycleReport> {
        let settings = self
            .registry
            .read_current(&self.key, self.generation, |r| r.settings.clone())
            .await?;

        let result = self.reconcile(&settings).await;
        Some(self.finish_cycle(&settings, result).await)
    }

    async fn reconcile(&self, settings: &SessionSettings) -> Result<Corrections, RemoteError> {
        let target = &settings.target;
        let state = self
            .bounded(
                "fetch_state",
                self.config.fetch_timeout,
                self.handle.fetch_state(target),
            )
            .await?;

        let mut corrections = Corrections::default();

        if let Some(name) = settings.desired.name.as_deref() {
            if state.current_name != name {
                self.notify(
                    format!(
                        "name drift detected: \"{}\" -> restoring \"{name}\"",
                        state.current_name
                    ),
                    Severity::Info,
                )
                .await;
                self.bounded(
                    "set_name",
                    self.config.action_timeout,
                    self.handle.set_name(name, target),
                )
                .await?;
                corrections.name_corrected = true;
            }
        }

        if let Some(label) = settings.desired.label.as_deref() {
            self.correct_labels(label, settings, &state, &mut corrections)
                .await;
        }

        Ok(corrections)
    }

    /// Best-effort label pass. Each member's outcome overwrites credential
    /// health, so the last attempted member decides the final value.
    async fn correct_labels(
        &self,
        label: &str,
        settings: &SessionSettings,
        state: &TargetState,
        corrections: &mut Corrections,
    ) {
        for member in state.members.iter().filter(|m| m.drifts_from(label)) {
            corrections.label_attempts = corrections.label_attempts.saturating_add(1);
            let result = self
                .bounded(
                    "set_member_label",
                    self.config.action_timeout,
                    self.handle
                        .set_member_label(label, &settings.target, &member.member_id),
                )
                .await;

            let health = match result {
                Ok(()) => CredentialHealth::Active,
                Err(e) => {
                    corrections.label_failures = corrections.label_failures.saturating_add(1);
                    warn!(
                        session_key = %self.key,
                        member_id = %member.member_id,
                        error = %e,
                        "Member label correction failed"
                    );
                    CredentialHealth::RateLimited
                }
            };
            self.registry
                .update_current(&self.key, self.generation, |r| {
                    r.credential_health = health;
                })
                .await;
        }
    }

    async fn finish_cycle(
        &self,
        settings: &SessionSettings,
        result: Result<Corrections, RemoteError>,
    ) -> CycleReport {
        let now = Utc::now();
        let succeeded = result.is_ok();
        let updated = self
            .registry
            .update_current(&self.key, self.generation, |record| {
                record.last_cycle_at = Some(now);
                if succeeded {
                    record.consecutive_failures = 0;
                    record.health = HealthStatus::Protecting;
                } else {
                    record.consecutive_failures = record.consecutive_failures.saturating_add(1);
                    record.health = HealthStatus::Reconnecting;
                    record.credential_health = CredentialHealth::InvalidOrExpired;
                }
                (record.consecutive_failures, record.settings.cadence())
            })
            .await;

        let (corrections, outcome, message, severity) = match result {
            Ok(corrections) => (
                corrections,
                CycleOutcome::Success,
                corrections.describe(),
                Severity::Info,
            ),
            Err(e) => (
                Corrections::default(),
                CycleOutcome::Failure {
                    reason: e.to_string(),
                },
                format!("sync error: {e}"),
                Severity::Error,
            ),
        };

        let Some((consecutive_failures, cadence)) = updated else {
            debug!(
                session_key = %self.key,
                generation = self.generation,
                target_id = %settings.target,
                "Cycle finished after the loop was superseded; not rescheduling"
            );
            return CycleReport {
                outcome,
                corrections,
                consecutive_failures: 0,
                next_delay: None,
            };
        };

        self.notify(message, severity).await;

        CycleReport {
            outcome,
            corrections,
            consecutive_failures,
            next_delay: Some(self.config.next_delay(consecutive_failures, cadence)),
        }
    }

    /// Emit an event if this loop is still current.
    async fn notify(&self, message: impl Into<String>, severity: Severity) -> bool {
        match self.registry.current_guard(&self.key, self.generation).await {
            Some(_guard) => {
                self.events.emit(&self.key, message, severity).await;
                true
            }
            None => false,
        }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        limit: Duration,
        call: impl Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, RemoteError> {
        tokio::time::timeout(limit, call)
            .await
            .map_err(|_| RemoteError::timeout(operation, limit))?
    }
}
