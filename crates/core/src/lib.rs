//! Core configuration and error types shared by every Vigil crate.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod error;

pub use config::{
    DEFAULT_PORT, EventsSection, SandboxSection, SandboxTarget, ServerSection,
    SupervisorSection, VigilConfig,
};
pub use error::{Error, Result};
