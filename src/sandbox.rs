//! Wiring for the in-memory sandbox backend.

use std::sync::Arc;

use tracing::info;
use vigil_core::{SandboxSection, VigilConfig};
use vigil_events::EventBroadcaster;
use vigil_reconciler::{InMemoryRemote, LoopConfig, MemberState, SessionController, TargetState};
use vigil_web::AppState;

/// Build the sandbox remote seeded from configuration.
pub fn sandbox_remote(section: &SandboxSection) -> InMemoryRemote {
    let builder = section
        .accepted_credentials
        .iter()
        .fold(InMemoryRemote::builder(), |b, creds| b.accept(creds.as_str()));

    section
        .targets
        .iter()
        .fold(builder, |b, target| {
            let members = target
                .members
                .iter()
                .map(|m| MemberState::new(m.as_str(), None))
                .collect();
            b.target(target.id.as_str(), TargetState::new(target.name.as_str(), members))
        })
        .build()
}

/// Assemble the controller and handler state from configuration.
pub fn build_state(config: &VigilConfig) -> AppState {
    let remote = sandbox_remote(&config.sandbox);
    info!(
        targets = config.sandbox.targets.len(),
        "Using in-memory sandbox remote"
    );

    let events = Arc::new(EventBroadcaster::with_limits(
        config.events.observer_capacity,
        config.events.max_consecutive_drops,
    ));
    let controller = SessionController::new(
        Arc::new(remote),
        events,
        LoopConfig::from(&config.supervisor),
    );
    AppState::new(Arc::new(controller))
}
