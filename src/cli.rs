//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Vigil - supervised watch sessions
#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(version)]
#[command(about = "Keep remote group names and member labels locked to a desired configuration")]
#[command(
    long_about = "Vigil runs one reconciliation loop per watch session. Each loop polls its target, restores drifted names and member labels, and streams status events to connected observers."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the control server until Ctrl+C
    Serve {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Listen address, overriding config and environment
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Validate configuration and print the effective values
    CheckConfig {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
