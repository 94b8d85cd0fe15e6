//! Session status events and their fan-out to observers.
//!
//! - **Event types**: `SessionEvent` carries a session key, a message, a
//!   severity and a timestamp
//! - **Broadcaster**: bounded, non-blocking delivery to every connected
//!   observer with eviction of observers that stop draining
//!
//! # Example
//!
//! ```ignore
//! use vigil_events::{EventBroadcaster, SessionKey, Severity};
//!
//! #[tokio::main]
//! async fn main() {
//!     let broadcaster = EventBroadcaster::new();
//!     let mut sub = broadcaster.subscribe().await;
//!
//!     let key = SessionKey::generate();
//!     broadcaster.emit(&key, "session activated", Severity::Info).await;
//!
//!     let event = sub.recv().await;
//!     println!("Received: {event:?}");
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod bus;
pub mod error;
pub mod event;
pub mod types;

pub use bus::{
    DEFAULT_MAX_CONSECUTIVE_DROPS, DEFAULT_OBSERVER_CAPACITY, DeliveryReport, DropCounter,
    EventBroadcaster, EventPattern, EventSubscription, ObserverId,
};
pub use error::{Error, Result};
pub use event::SessionEvent;
pub use types::{EventId, SESSION_KEY_PREFIX, SessionKey, Severity};
