//! Session lifecycle controller.
//!
//! Orchestrates credential exchange, registry insertion and loop start, in
//! place reconfiguration, credential rotation and termination.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use vigil_events::{EventBroadcaster, SessionKey, Severity};

use crate::error::{Error, RemoteError, Result};
use crate::r#loop::{LoopConfig, LoopStopper, SessionLoop};
use crate::registry::{SessionRecord, SessionRegistry};
use crate::remote::{AccountHandle, Credentials, RemoteAccountClient, TargetId};
use crate::types::{CredentialHealth, DesiredConfig, SessionSettings, SessionSummary};

/// Request to start supervising a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSession {
    pub credentials: Credentials,
    pub target_id: TargetId,
    #[serde(default)]
    pub desired_name: Option<String>,
    #[serde(default)]
    pub desired_label: Option<String>,
    #[serde(default)]
    pub cadence_secs: Option<u64>,
}

/// Request to change an existing session.
///
/// Credentials that are absent, blank or equal to the stored payload leave
/// the running loop in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconfigureSession {
    pub target_id: TargetId,
    #[serde(default)]
    pub desired_name: Option<String>,
    #[serde(default)]
    pub desired_label: Option<String>,
    #[serde(default)]
    pub cadence_secs: Option<u64>,
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

/// How a reconfiguration was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconfigured {
    /// Settings changed under the running loop.
    InPlace,
    /// The loop was restarted with new credentials.
    Rotated,
}

enum StartMode {
    Fresh,
    Rotation,
}

/// Creates, reconfigures, lists and terminates supervised sessions.
pub struct SessionController {
    registry: Arc<SessionRegistry>,
    events: Arc<EventBroadcaster>,
    client: Arc<dyn RemoteAccountClient>,
    config: LoopConfig,
}

impl SessionController {
    /// Create a controller with an empty registry.
    pub fn new(
        client: Arc<dyn RemoteAccountClient>,
        events: Arc<EventBroadcaster>,
        config: LoopConfig,
    ) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            events,
            client,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &Arc<EventBroadcaster> {
        &self.events
    }

    /// Authenticate and start supervising a target.
    ///
    /// The first cycle runs immediately.
    ///
    /// # Errors
    ///
    /// `Error::Auth` when the credential exchange fails; no record is created.
    /// `Error::InvalidRequest` when the target id is blank.
    pub async fn create_session(&self, request: CreateSession) -> Result<SessionKey> {
        let settings = self.settings(
            request.target_id,
            request.desired_name,
            request.desired_label,
            request.cadence_secs,
        )?;
        let key = SessionKey::generate();
        self.start(&key, request.credentials, settings, StartMode::Fresh)
            .await?;
        Ok(key)
    }

    /// Change a session's target, desired configuration or cadence, rotating
    /// credentials when new ones are supplied.
    ///
    /// A stopped record (left behind by a failed rotation) is restarted when
    /// credentials are supplied, even if they equal the stored payload.
    ///
    /// # Errors
    ///
    /// `Error::SessionNotFound` for an unknown key or one terminated before a
    /// rotation finished, `Error::Auth` when a rotation's credential exchange
    /// fails.
    pub async fn reconfigure_session(
        &self,
        key: &SessionKey,
        request: ReconfigureSession,
    ) -> Result<Reconfigured> {
        let settings = self.settings(
            request.target_id,
            request.desired_name,
            request.desired_label,
            request.cadence_secs,
        )?;
        let supplied = request.credentials.filter(|c| !c.is_blank());

        let rotation = self
            .registry
            .update(key, |record| match supplied {
                Some(credentials) if credentials != record.credentials || !record.running => {
                    record.stop();
                    Some(credentials)
                }
                _ => {
                    record.settings = settings.clone();
                    None
                }
            })
            .await
            .ok_or_else(|| Error::session_not_found(key))?;

        let Some(credentials) = rotation else {
            info!(session_key = %key, "Session reconfigured in place");
            self.emit_if_present(key, "settings updated", Severity::Info)
                .await;
            return Ok(Reconfigured::InPlace);
        };

        info!(session_key = %key, "Rotating session credentials");
        if !self
            .emit_if_present(key, "credentials changed: re-authenticating", Severity::Info)
            .await
        {
            return Err(Error::session_not_found(key));
        }

        match self.start(key, credentials, settings, StartMode::Rotation).await {
            Ok(()) => Ok(Reconfigured::Rotated),
            Err(e @ Error::Auth { .. }) => {
                self.registry
                    .update(key, |record| {
                        if !record.running {
                            record.credential_health = CredentialHealth::InvalidOrExpired;
                        }
                    })
                    .await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Stop and remove a session. Unknown keys are ignored.
    pub async fn terminate_session(&self, key: &SessionKey) {
        if self.registry.remove(key).await.is_some() {
            info!(session_key = %key, "Session terminated");
            self.events
                .emit(key, "session terminated", Severity::Info)
                .await;
        }
    }

    /// Summaries of every session in insertion order.
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        self.registry.list().await
    }

    pub async fn session(&self, key: &SessionKey) -> Option<SessionSummary> {
        self.registry.summary(key).await
    }

    /// Terminate every session.
    pub async fn shutdown(&self) {
        let stopped = self.registry.drain().await;
        info!(sessions = stopped.len(), "All sessions stopped");
    }

    /// Emit only while a record is registered under `key`, so nothing
    /// follows a termination notice.
    async fn emit_if_present(
        &self,
        key: &SessionKey,
        message: impl Into<String>,
        severity: Severity,
    ) -> bool {
        match self.registry.present_guard(key).await {
            Some(_guard) => {
                self.events.emit(key, message, severity).await;
                true
            }
            None => false,
        }
    }

    fn settings(
        &self,
        target: TargetId,
        desired_name: Option<String>,
        desired_label: Option<String>,
        cadence_secs: Option<u64>,
    ) -> Result<SessionSettings> {
        if target.as_str().trim().is_empty() {
            return Err(Error::invalid_request("target_id must not be empty"));
        }
        Ok(SessionSettings {
            target,
            desired: DesiredConfig::new(desired_name, desired_label),
            cadence_secs: self.config.resolve_cadence(cadence_secs),
        })
    }

    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> std::result::Result<Box<dyn AccountHandle>, RemoteError> {
        tokio::time::timeout(
            self.config.auth_timeout,
            self.client.authenticate(credentials),
        )
        .await
        .map_err(|_| RemoteError::timeout("authenticate", self.config.auth_timeout))?
    }

    /// Authenticate, insert the record and spawn its loop.
    async fn start(
        &self,
        key: &SessionKey,
        credentials: Credentials,
        settings: SessionSettings,
        mode: StartMode,
    ) -> Result<()> {
        let handle = match self.authenticate(&credentials).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(session_key = %key, error = %e, "Credential exchange failed");
                let message = format!("login error: {e}");
                return match mode {
                    StartMode::Fresh => {
                        self.events.emit(key, message, Severity::Error).await;
                        Err(Error::auth(key, e.to_string()))
                    }
                    StartMode::Rotation => {
                        if self.emit_if_present(key, message, Severity::Error).await {
                            Err(Error::auth(key, e.to_string()))
                        } else {
                            Err(Error::session_not_found(key))
                        }
                    }
                };
            }
        };

        let generation = self.registry.next_generation();
        let (stopper, stop_rx) = LoopStopper::new();
        let record = SessionRecord::new(key.clone(), credentials, settings, generation, stopper);

        match mode {
            StartMode::Fresh => {
                self.registry.insert(record).await;
            }
            StartMode::Rotation => {
                if self.registry.replace(record).await.is_err() {
                    info!(
                        session_key = %key,
                        "Session terminated during rotation; not restarting"
                    );
                    return Err(Error::session_not_found(key));
                }
            }
        }

        if let Some(_guard) = self.registry.current_guard(key, generation).await {
            self.events
                .emit(key, "session activated", Severity::Info)
                .await;
        }

        let session_loop = SessionLoop::new(
            key.clone(),
            generation,
            handle,
            Arc::clone(&self.registry),
            Arc::clone(&self.events),
            self.config.clone(),
            stop_rx,
        );
        tokio::spawn(session_loop.run());
        Ok(())
    }
}
