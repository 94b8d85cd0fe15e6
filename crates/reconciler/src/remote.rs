//! The remote account capability consumed by session loops.
//!
//! A client exchanges opaque credentials for an [`AccountHandle`]. The handle
//! is owned by exactly one session loop and is dropped when the loop ends.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

/// Opaque serialized authentication payload.
///
/// `Debug` never prints the payload.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(String);

impl Credentials {
    pub fn new(payload: impl Into<String>) -> Self {
        Self(payload.into())
    }

    /// The raw payload, for handing to a client or echoing to operators.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credentials(<redacted>, {} bytes)", self.0.len())
    }
}

impl From<&str> for Credentials {
    fn from(payload: &str) -> Self {
        Self::new(payload)
    }
}

/// Identifier of the remote resource (group or channel) a session watches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifier of one member of a target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Observed label of one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberState {
    pub member_id: MemberId,
    pub current_label: Option<String>,
}

impl MemberState {
    pub fn new(member_id: impl Into<MemberId>, current_label: Option<&str>) -> Self {
        Self {
            member_id: member_id.into(),
            current_label: current_label.map(str::to_string),
        }
    }

    /// Whether this member's label differs from `desired`.
    pub fn drifts_from(&self, desired: &str) -> bool {
        self.current_label.as_deref() != Some(desired)
    }
}

/// Snapshot of a target as returned by a fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetState {
    pub current_name: String,
    pub members: Vec<MemberState>,
}

impl TargetState {
    pub fn new(current_name: impl Into<String>, members: Vec<MemberState>) -> Self {
        Self {
            current_name: current_name.into(),
            members,
        }
    }
}

/// Exchanges credentials for an account handle.
#[async_trait]
pub trait RemoteAccountClient: Send + Sync {
    /// Authenticate and return a handle bound to the account.
    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Box<dyn AccountHandle>, RemoteError>;
}

/// Account-bound operations against remote targets.
///
/// Implementations need not bound their own latency; the session loop
/// wraps every call in a timeout.
#[async_trait]
pub trait AccountHandle: Send + Sync {
    /// Read the current name and member labels of a target.
    async fn fetch_state(&self, target: &TargetId) -> Result<TargetState, RemoteError>;

    /// Rename the target.
    async fn set_name(&self, name: &str, target: &TargetId) -> Result<(), RemoteError>;

    /// Set the label of one member of the target.
    async fn set_member_label(
        &self,
        label: &str,
        target: &TargetId,
        member: &MemberId,
    ) -> Result<(), RemoteError>;
}
