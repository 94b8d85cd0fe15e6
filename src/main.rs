//! # Vigil - control server entry point
//!
//! ## Startup Sequence
//!
//! 1. **Tracing** - install the subscriber (`RUST_LOG`, default `info`)
//! 2. **Configuration** - load TOML, apply environment overrides, validate
//! 3. **Controller** - wire the remote backend, broadcaster and registry
//! 4. **Axum API** - serve REST and WebSocket routes
//!
//! ## Shutdown
//!
//! Ctrl+C stops accepting connections, then every session loop is stopped.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use vigil::cli::{Cli, Commands};
use vigil::sandbox::build_state;
use vigil_core::VigilConfig;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { config, bind } => serve(config.as_deref(), bind).await,
        Commands::CheckConfig { config } => check_config(config.as_deref()),
    }
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(path: Option<&Path>) -> Result<VigilConfig> {
    VigilConfig::load(path).with_context(|| match path {
        Some(path) => format!("Failed to load configuration from {}", path.display()),
        None => "Failed to load default configuration".to_string(),
    })
}

async fn serve(config_path: Option<&Path>, bind: Option<String>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(bind) = bind {
        config.server.bind_address = bind;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Vigil starting");
    let state = build_state(&config);
    let controller = state.controller.clone();

    vigil_web::run_server(&config.server.bind_address, state, wait_for_shutdown())
        .await
        .context("Control server failed")?;

    controller.shutdown().await;
    info!("Vigil stopped gracefully");
    Ok(())
}

fn check_config(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let rendered = config
        .to_toml_string()
        .context("Failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}
