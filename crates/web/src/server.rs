//! Server setup with Tower middleware

use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use super::routes;
use super::state::AppState;
use crate::Error;

/// Create the axum application with middleware.
pub fn create_app(state: AppState) -> Router {
    routes::create_router().with_state(state).layer(
        ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        ),
    )
}

/// Bind `bind_address` and serve until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn run_server(
    bind_address: &str,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Error> {
    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(|source| Error::Bind {
            address: bind_address.to_string(),
            source,
        })?;
    let local: SocketAddr = listener.local_addr()?;
    info!(address = %local, "Vigil listening");

    axum::serve(listener, create_app(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server stopped");
    Ok(())
}
