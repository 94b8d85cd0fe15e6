//! Process-wide session registry.
//!
//! All mutation of session records goes through this type. Loops fence their
//! writes with a generation number so a superseded or terminated loop can
//! never touch the record that replaced it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, RwLockReadGuard};
use vigil_events::SessionKey;

use crate::r#loop::LoopStopper;
use crate::remote::Credentials;
use crate::types::{CredentialHealth, HealthStatus, SessionSettings, SessionSummary};

/// One supervised watch target.
#[derive(Debug)]
pub struct SessionRecord {
    pub key: SessionKey,
    pub credentials: Credentials,
    pub settings: SessionSettings,
    pub running: bool,
    pub generation: u64,
    pub consecutive_failures: u32,
    pub health: HealthStatus,
    pub credential_health: CredentialHealth,
    pub created_at: DateTime<Utc>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    stopper: Option<LoopStopper>,
    sequence: u64,
}

impl SessionRecord {
    /// A freshly authenticated record, running under `generation`.
    pub fn new(
        key: SessionKey,
        credentials: Credentials,
        settings: SessionSettings,
        generation: u64,
        stopper: LoopStopper,
    ) -> Self {
        Self {
            key,
            credentials,
            settings,
            running: true,
            generation,
            consecutive_failures: 0,
            health: HealthStatus::Active,
            credential_health: CredentialHealth::Active,
            created_at: Utc::now(),
            last_cycle_at: None,
            stopper: Some(stopper),
            sequence: 0,
        }
    }

    /// Whether the loop of `generation` still owns this record.
    pub fn is_current(&self, generation: u64) -> bool {
        self.running && self.generation == generation
    }

    /// Mark the record stopped and interrupt its loop's pending delay.
    pub fn stop(&mut self) {
        self.running = false;
        if let Some(stopper) = self.stopper.take() {
            stopper.stop();
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_key: self.key.clone(),
            target_id: self.settings.target.clone(),
            desired_name: self.settings.desired.name.clone(),
            desired_label: self.settings.desired.label.clone(),
            cadence_secs: self.settings.cadence_secs,
            credentials: self.credentials.expose().to_string(),
            health: self.health,
            credential_health: self.credential_health,
            consecutive_failures: self.consecutive_failures,
            running: self.running,
            created_at: self.created_at,
            last_cycle_at: self.last_cycle_at,
        }
    }
}

/// Read guard proving that a record is still registered, or that a loop
/// generation is still current.
///
/// While it is held no terminate or rotation can complete, so anything the
/// holder emits is ordered before them.
pub struct CurrentGuard<'a> {
    _sessions: RwLockReadGuard<'a, HashMap<SessionKey, SessionRecord>>,
}

/// Thread-safe map from session key to record.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionKey, SessionRecord>>,
    next_sequence: AtomicU64,
    next_generation: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a generation number for a loop about to start.
    pub fn next_generation(&self) -> u64 {
        self.next_generation
            .fetch_add(1, Ordering::Relaxed)
            .saturating_add(1)
    }

    /// Insert a record. A record already under the key is stopped and
    /// returned, and the new record takes over its listing position.
    pub async fn insert(&self, mut record: SessionRecord) -> Option<SessionRecord> {
        let mut sessions = self.sessions.write().await;
        record.sequence = match sessions.get(&record.key) {
            Some(existing) => existing.sequence,
            None => self.next_sequence.fetch_add(1, Ordering::Relaxed),
        };
        let mut previous = sessions.insert(record.key.clone(), record);
        if let Some(previous) = previous.as_mut() {
            previous.stop();
        }
        previous
    }

    /// Replace the record under an existing key. Gives the record back when
    /// the key has been removed in the meantime.
    pub async fn replace(&self, record: SessionRecord) -> Result<SessionRecord, SessionRecord> {
        let mut sessions = self.sessions.write().await;
        let Some(existing) = sessions.get_mut(&record.key) else {
            return Err(record);
        };
        let mut record = record;
        record.sequence = existing.sequence;
        let mut previous = std::mem::replace(existing, record);
        previous.stop();
        Ok(previous)
    }

    pub async fn summary(&self, key: &SessionKey) -> Option<SessionSummary> {
        self.sessions.read().await.get(key).map(SessionRecord::summary)
    }

    /// Summaries of every record in insertion order.
    pub async fn list(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.read().await;
        let mut records: Vec<&SessionRecord> = sessions.values().collect();
        records.sort_by_key(|r| r.sequence);
        records.into_iter().map(SessionRecord::summary).collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Apply `f` to the record under `key`, if any.
    pub async fn update<R>(
        &self,
        key: &SessionKey,
        f: impl FnOnce(&mut SessionRecord) -> R,
    ) -> Option<R> {
        self.sessions.write().await.get_mut(key).map(f)
    }

    /// Apply `f` only while `generation` still owns the record.
    pub async fn update_current<R>(
        &self,
        key: &SessionKey,
        generation: u64,
        f: impl FnOnce(&mut SessionRecord) -> R,
    ) -> Option<R> {
        self.sessions
            .write()
            .await
            .get_mut(key)
            .filter(|r| r.is_current(generation))
            .map(f)
    }

    /// Read the record only while `generation` still owns it.
    pub async fn read_current<R>(
        &self,
        key: &SessionKey,
        generation: u64,
        f: impl FnOnce(&SessionRecord) -> R,
    ) -> Option<R> {
        self.sessions
            .read()
            .await
            .get(key)
            .filter(|r| r.is_current(generation))
            .map(f)
    }

    /// Hold a read guard if `generation` still owns the record.
    pub async fn current_guard(
        &self,
        key: &SessionKey,
        generation: u64,
    ) -> Option<CurrentGuard<'_>> {
        let sessions = self.sessions.read().await;
        let current = sessions.get(key).is_some_and(|r| r.is_current(generation));
        if current {
            Some(CurrentGuard {
                _sessions: sessions,
            })
        } else {
            None
        }
    }

    /// Hold a read guard if any record is registered under `key`.
    pub async fn present_guard(&self, key: &SessionKey) -> Option<CurrentGuard<'_>> {
        let sessions = self.sessions.read().await;
        if sessions.contains_key(key) {
            Some(CurrentGuard {
                _sessions: sessions,
            })
        } else {
            None
        }
    }

    /// Remove and stop the record under `key`.
    pub async fn remove(&self, key: &SessionKey) -> Option<SessionRecord> {
        let mut removed = self.sessions.write().await.remove(key);
        if let Some(record) = removed.as_mut() {
            record.stop();
        }
        removed
    }

    /// Remove and stop every record.
    pub async fn drain(&self) -> Vec<SessionRecord> {
        let mut sessions = self.sessions.write().await;
        let mut records: Vec<SessionRecord> = sessions.drain().map(|(_, r)| r).collect();
        for record in &mut records {
            record.stop();
        }
        records.sort_by_key(|r| r.sequence);
        records
    }
}
