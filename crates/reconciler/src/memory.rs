//! In-memory remote account backend.
//!
//! Backs the sandbox deployment and the test suite. Targets live in a shared
//! map, corrective actions mutate it, and every call is recorded so callers
//! can assert on exactly what a session loop did. Failures and latency can be
//! injected per call kind.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::remote::{
    AccountHandle, Credentials, MemberId, MemberState, RemoteAccountClient, TargetId, TargetState,
};

/// One call observed by the in-memory remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Authenticate {
        credentials: String,
    },
    FetchState {
        handle: u64,
        target: TargetId,
    },
    SetName {
        handle: u64,
        target: TargetId,
        name: String,
    },
    SetMemberLabel {
        handle: u64,
        target: TargetId,
        member: MemberId,
        label: String,
    },
}

#[derive(Debug, Default)]
struct Faults {
    fetch_failures: u32,
    hang_fetches: bool,
    fetch_latency: Option<Duration>,
    name_failures: u32,
    hang_renames: bool,
    failing_members: HashSet<MemberId>,
    hanging_members: HashSet<MemberId>,
    auth_latency: Option<Duration>,
}

#[derive(Debug, Default)]
struct RemoteState {
    accepted: HashSet<String>,
    targets: HashMap<TargetId, TargetState>,
    faults: Faults,
    calls: Vec<RemoteCall>,
    in_flight: HashMap<TargetId, usize>,
    max_in_flight: HashMap<TargetId, usize>,
}

/// Shared in-memory remote. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRemote {
    state: Arc<Mutex<RemoteState>>,
    next_handle: Arc<AtomicU64>,
}

/// Builder for [`InMemoryRemote`].
#[derive(Debug, Default)]
pub struct InMemoryRemoteBuilder {
    accepted: HashSet<String>,
    targets: HashMap<TargetId, TargetState>,
}

impl InMemoryRemoteBuilder {
    /// Accept this credential payload. With no accepted payloads every
    /// non-blank payload authenticates.
    pub fn accept(mut self, credentials: impl Into<String>) -> Self {
        self.accepted.insert(credentials.into());
        self
    }

    pub fn target(mut self, id: impl Into<TargetId>, state: TargetState) -> Self {
        self.targets.insert(id.into(), state);
        self
    }

    pub fn build(self) -> InMemoryRemote {
        InMemoryRemote {
            state: Arc::new(Mutex::new(RemoteState {
                accepted: self.accepted,
                targets: self.targets,
                ..RemoteState::default()
            })),
            next_handle: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl InMemoryRemote {
    pub fn builder() -> InMemoryRemoteBuilder {
        InMemoryRemoteBuilder::default()
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state of a target, as a later fetch would see it.
    pub fn target_state(&self, target: &TargetId) -> Option<TargetState> {
        self.lock().targets.get(target).cloned()
    }

    /// Replace or add a target.
    pub fn put_target(&self, target: impl Into<TargetId>, state: TargetState) {
        self.lock().targets.insert(target.into(), state);
    }

    /// Make the next `count` fetches fail.
    pub fn fail_next_fetches(&self, count: u32) {
        self.lock().faults.fetch_failures = count;
    }

    /// Make fetches never complete until switched off again.
    pub fn hang_fetches(&self, hang: bool) {
        self.lock().faults.hang_fetches = hang;
    }

    pub fn set_fetch_latency(&self, latency: Option<Duration>) {
        self.lock().faults.fetch_latency = latency;
    }

    /// Make the next `count` renames fail.
    pub fn fail_next_renames(&self, count: u32) {
        self.lock().faults.name_failures = count;
    }

    /// Make renames never complete until switched off again.
    pub fn hang_renames(&self, hang: bool) {
        self.lock().faults.hang_renames = hang;
    }

    /// Reject every label change for this member.
    pub fn fail_labels_for(&self, member: impl Into<MemberId>) {
        self.lock().faults.failing_members.insert(member.into());
    }

    /// Make label changes for this member never complete.
    pub fn hang_labels_for(&self, member: impl Into<MemberId>) {
        self.lock().faults.hanging_members.insert(member.into());
    }

    /// Delay every credential exchange, whether it succeeds or not.
    pub fn set_auth_latency(&self, latency: Option<Duration>) {
        self.lock().faults.auth_latency = latency;
    }

    /// Every call observed so far, in order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, RemoteCall::FetchState { .. }))
            .count()
    }

    /// `(name, target)` of every rename attempt.
    pub fn rename_calls(&self) -> Vec<(String, TargetId)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                RemoteCall::SetName { name, target, .. } => Some((name.clone(), target.clone())),
                _ => None,
            })
            .collect()
    }

    /// Members of every label attempt, in order.
    pub fn label_calls(&self) -> Vec<MemberId> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                RemoteCall::SetMemberLabel { member, .. } => Some(member.clone()),
                _ => None,
            })
            .collect()
    }

    /// Handles that have issued a fetch, in order of first use.
    pub fn fetching_handles(&self) -> Vec<u64> {
        let mut handles = Vec::new();
        for call in &self.lock().calls {
            if let RemoteCall::FetchState { handle, .. } = call {
                if !handles.contains(handle) {
                    handles.push(*handle);
                }
            }
        }
        handles
    }

    /// Highest number of fetches that were in flight at once for a target.
    pub fn max_concurrent_fetches(&self, target: &TargetId) -> usize {
        self.lock().max_in_flight.get(target).copied().unwrap_or(0)
    }

    fn accepts(&self, credentials: &Credentials) -> bool {
        if credentials.is_blank() {
            return false;
        }
        let state = self.lock();
        state.accepted.is_empty() || state.accepted.contains(credentials.expose())
    }
}

#[async_trait]
impl RemoteAccountClient for InMemoryRemote {
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Box<dyn AccountHandle>, RemoteError> {
        let latency = {
            let mut state = self.lock();
            state.calls.push(RemoteCall::Authenticate {
                credentials: credentials.expose().to_string(),
            });
            state.faults.auth_latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if !self.accepts(credentials) {
            return Err(RemoteError::auth("credentials rejected"));
        }
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        Ok(Box::new(InMemoryHandle {
            id,
            remote: self.clone(),
        }))
    }
}

/// Handle issued by [`InMemoryRemote`]. Ids start at 1 and increase per
/// successful authentication.
#[derive(Debug)]
pub struct InMemoryHandle {
    id: u64,
    remote: InMemoryRemote,
}

impl InMemoryHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Counts a fetch as in flight until dropped, including when a timeout
/// abandons it.
struct InFlight {
    remote: InMemoryRemote,
    target: TargetId,
}

impl InFlight {
    fn enter(remote: &InMemoryRemote, target: &TargetId) -> Self {
        let mut state = remote.lock();
        let current = {
            let count = state.in_flight.entry(target.clone()).or_insert(0);
            *count = count.saturating_add(1);
            *count
        };
        let max = state.max_in_flight.entry(target.clone()).or_insert(0);
        *max = (*max).max(current);
        Self {
            remote: remote.clone(),
            target: target.clone(),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Some(count) = self.remote.lock().in_flight.get_mut(&self.target) {
            *count = count.saturating_sub(1);
        }
    }
}

#[async_trait]
impl AccountHandle for InMemoryHandle {
    async fn fetch_state(&self, target: &TargetId) -> Result<TargetState, RemoteError> {
        let (hang, latency, fail) = {
            let mut state = self.remote.lock();
            state.calls.push(RemoteCall::FetchState {
                handle: self.id,
                target: target.clone(),
            });
            let fail = state.faults.fetch_failures > 0;
            state.faults.fetch_failures = state.faults.fetch_failures.saturating_sub(1);
            (state.faults.hang_fetches, state.faults.fetch_latency, fail)
        };

        let _in_flight = InFlight::enter(&self.remote, target);
        if hang {
            std::future::pending::<()>().await;
        }
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if fail {
            return Err(RemoteError::fetch("injected fetch failure"));
        }

        self.remote
            .lock()
            .targets
            .get(target)
            .cloned()
            .ok_or_else(|| RemoteError::fetch(format!("target '{target}' not found")))
    }

    async fn set_name(&self, name: &str, target: &TargetId) -> Result<(), RemoteError> {
        let hang = {
            let mut state = self.remote.lock();
            state.calls.push(RemoteCall::SetName {
                handle: self.id,
                target: target.clone(),
                name: name.to_string(),
            });
            state.faults.hang_renames
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = self.remote.lock();
        if state.faults.name_failures > 0 {
            state.faults.name_failures = state.faults.name_failures.saturating_sub(1);
            return Err(RemoteError::action("set_name", "injected rename failure"));
        }
        let target_state = state
            .targets
            .get_mut(target)
            .ok_or_else(|| RemoteError::action("set_name", format!("target '{target}' not found")))?;
        target_state.current_name = name.to_string();
        Ok(())
    }

    async fn set_member_label(
        &self,
        label: &str,
        target: &TargetId,
        member: &MemberId,
    ) -> Result<(), RemoteError> {
        let hang = {
            let mut state = self.remote.lock();
            state.calls.push(RemoteCall::SetMemberLabel {
                handle: self.id,
                target: target.clone(),
                member: member.clone(),
                label: label.to_string(),
            });
            state.faults.hanging_members.contains(member)
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = self.remote.lock();
        if state.faults.failing_members.contains(member) {
            return Err(RemoteError::action("set_member_label", "rate limited"));
        }
        let slot = state
            .targets
            .get_mut(target)
            .and_then(|t| t.members.iter_mut().find(|m| &m.member_id == member))
            .ok_or_else(|| {
                RemoteError::action("set_member_label", format!("member '{member}' not found"))
            })?;
        *slot = MemberState {
            member_id: member.clone(),
            current_label: Some(label.to_string()),
        };
        Ok(())
    }
}
