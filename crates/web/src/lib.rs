//! Vigil control surface
//!
//! REST and WebSocket API over the session controller, with tower middleware
//! for CORS and request tracing. Every session event is streamed to
//! WebSocket clients as it is emitted.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

pub mod error;
pub mod routes;
pub mod server;
pub mod state;

pub use error::{AppError, ErrorResponse};
pub use routes::health::{HealthResponse, format_uptime};
pub use routes::sessions::{CreatedResponse, ListSessionsResponse};
pub use routes::websocket::{ClientMessage, ServerMessage};
pub use server::{create_app, run_server};
pub use state::AppState;

/// Web server errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The listen address could not be bound
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
