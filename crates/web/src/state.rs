//! Shared handler state.

use std::sync::Arc;
use std::time::Instant;

use vigil_events::EventBroadcaster;
use vigil_reconciler::SessionController;

/// State handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<SessionController>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(controller: Arc<SessionController>) -> Self {
        Self {
            controller,
            started_at: Instant::now(),
        }
    }

    /// Broadcaster the controller's loops emit into.
    pub fn events(&self) -> &Arc<EventBroadcaster> {
        self.controller.events()
    }
}
