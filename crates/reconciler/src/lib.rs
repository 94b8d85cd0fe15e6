//! Session supervision and drift reconciliation.
//!
//! Each supervised session runs its own loop that keeps a remote target's
//! name and per-member labels locked to a desired configuration:
//!
//! - **Fetch**: read the target's current state, bounded by a timeout
//! - **Diff**: compare the observed name and labels with the desired ones
//! - **Correct**: rename the target, then relabel drifting members one by one
//! - **Reschedule**: wait the session's cadence, or a fixed retry delay once
//!   failures pile up
//!
//! # Key Concepts
//!
//! ## Generations
//!
//! Every loop start allocates a generation number. A loop writes to its
//! record and emits events only while its generation is current, so a loop
//! that was terminated or replaced by a credential rotation goes quiet even
//! if a remote call was still in flight.
//!
//! ## Health
//!
//! - `HealthStatus`: ACTIVE until the first cycle, then PROTECTING or
//!   RECONNECTING
//! - `CredentialHealth`: ACTIVE, RATE-LIMITED after a rejected label change,
//!   INVALID/EXPIRED after a failed cycle
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use vigil_events::EventBroadcaster;
//! use vigil_reconciler::{
//!     CreateSession, InMemoryRemote, LoopConfig, SessionController, TargetState,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let remote = InMemoryRemote::builder()
//!         .target("t-1", TargetState::new("Beta", vec![]))
//!         .build();
//!     let controller = SessionController::new(
//!         Arc::new(remote),
//!         Arc::new(EventBroadcaster::new()),
//!         LoopConfig::default(),
//!     );
//!
//!     let key = controller
//!         .create_session(CreateSession {
//!             credentials: "token".into(),
//!             target_id: "t-1".into(),
//!             desired_name: Some("Alpha".to_string()),
//!             desired_label: None,
//!             cadence_secs: Some(10),
//!         })
//!         .await;
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod controller;
pub mod error;
pub mod r#loop;
pub mod memory;
pub mod registry;
pub mod remote;
pub mod types;

// Re-export main types
pub use controller::{CreateSession, ReconfigureSession, Reconfigured, SessionController};
pub use error::{Error, RemoteError, Result};
pub use memory::{InMemoryHandle, InMemoryRemote, InMemoryRemoteBuilder, RemoteCall};
pub use r#loop::{LoopConfig, LoopStopper, SessionLoop};
pub use registry::{CurrentGuard, SessionRecord, SessionRegistry};
pub use remote::{
    AccountHandle, Credentials, MemberId, MemberState, RemoteAccountClient, TargetId, TargetState,
};
pub use types::{
    Corrections, CredentialHealth, CycleOutcome, CycleReport, DesiredConfig, HealthStatus,
    SessionSettings, SessionSummary,
};
