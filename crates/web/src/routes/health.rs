//! Health check endpoint: GET /health

use std::time::Duration;

use super::super::state::AppState;
use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Server uptime as `HH:MM:SS`.
    pub uptime: String,
    pub sessions: usize,
}

/// Format a duration as `HH:MM:SS`. Hours keep counting past 99.
pub fn format_uptime(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

/// GET /health - Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime: format_uptime(state.started_at.elapsed()),
        sessions: state.controller.registry().len().await,
    })
}
