//! # Vigil
//!
//! Supervised watch sessions that keep remote group names and member labels
//! locked to a desired configuration.
//!
//! This library wires the workspace crates into the `vigil` binary.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod cli;
pub mod sandbox;

pub use vigil_core;
pub use vigil_events;
pub use vigil_reconciler;
pub use vigil_web;
