//! Session endpoints
//!
//! - `GET /api/sessions` - List sessions in insertion order
//! - `POST /api/sessions` - Create a session
//! - `GET /api/sessions/{key}` - One session summary
//! - `PUT /api/sessions/{key}` - Reconfigure, rotating credentials if new ones are given
//! - `DELETE /api/sessions/{key}` - Terminate (idempotent)

use super::super::error::Result;
use super::super::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use vigil_events::SessionKey;
use vigil_reconciler::{CreateSession, ReconfigureSession, SessionSummary};

/// Response for session creation
#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedResponse {
    pub session_key: SessionKey,
}

/// Response for listing sessions
#[derive(Debug, Serialize, Deserialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<SessionSummary>,
    pub total: usize,
}

fn parse_key(raw: &str) -> Result<SessionKey> {
    Ok(raw.parse::<SessionKey>()?)
}

/// GET /api/sessions - List sessions
pub async fn list_sessions(State(state): State<AppState>) -> Json<ListSessionsResponse> {
    let sessions = state.controller.list_sessions().await;
    let total = sessions.len();
    Json(ListSessionsResponse { sessions, total })
}

/// POST /api/sessions - Create a session
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSession>,
) -> Result<(StatusCode, Json<CreatedResponse>)> {
    let session_key = state.controller.create_session(request).await?;
    info!(session_key = %session_key, "Session created via API");
    Ok((StatusCode::CREATED, Json(CreatedResponse { session_key })))
}

/// GET /api/sessions/{key} - Query one session
pub async fn get_session(
    Path(key): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<SessionSummary>> {
    let key = parse_key(&key)?;
    state
        .controller
        .session(&key)
        .await
        .map(Json)
        .ok_or_else(|| vigil_reconciler::Error::session_not_found(&key).into())
}

/// PUT /api/sessions/{key} - Reconfigure a session
pub async fn reconfigure_session(
    Path(key): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<ReconfigureSession>,
) -> Result<StatusCode> {
    let key = parse_key(&key)?;
    state.controller.reconfigure_session(&key, request).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/sessions/{key} - Terminate a session
pub async fn terminate_session(
    Path(key): Path<String>,
    State(state): State<AppState>,
) -> Result<StatusCode> {
    let key = parse_key(&key)?;
    state.controller.terminate_session(&key).await;
    Ok(StatusCode::NO_CONTENT)
}
