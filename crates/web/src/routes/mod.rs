//! HTTP and WebSocket routes
//!
//! ## Route Structure
//!
//! - `GET /health` - Health check with server uptime
//! - `GET /api/sessions` - List sessions
//! - `POST /api/sessions` - Create a session
//! - `GET /api/sessions/{key}` - Query one session
//! - `PUT /api/sessions/{key}` - Reconfigure a session
//! - `DELETE /api/sessions/{key}` - Terminate a session
//! - `GET /ws` - WebSocket control channel and event stream

use super::state::AppState;
use axum::{Router, routing::get};

pub mod health;
pub mod sessions;
pub mod websocket;

/// Create the router with every route registered.
pub fn create_router() -> Router<AppState> {
    let api_routes = Router::new()
        .route(
            "/sessions",
            get(sessions::list_sessions).post(sessions::create_session),
        )
        .route(
            "/sessions/{key}",
            get(sessions::get_session)
                .put(sessions::reconfigure_session)
                .delete(sessions::terminate_session),
        );

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api", api_routes)
        .route("/ws", get(websocket::websocket_handler))
}
