//! Event broadcaster for fan-out to connected observers.
//!
//! Every observer owns a bounded queue. Delivery uses `try_send`, so a slow
//! observer never blocks the emitting reconciliation loop: when its queue is
//! full the event is discarded for that observer, and after enough
//! consecutive discards the observer is evicted. There is no replay.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::event::SessionEvent;
use crate::types::{SessionKey, Severity};

/// Default bounded queue length per observer.
pub const DEFAULT_OBSERVER_CAPACITY: usize = 256;

/// Default number of consecutive discards before eviction.
pub const DEFAULT_MAX_CONSECUTIVE_DROPS: u32 = 5;

/// Counts consecutive discards for one observer.
pub struct DropCounter {
    consecutive: AtomicU32,
    threshold: u32,
}

impl DropCounter {
    /// Create a counter that trips after `threshold` consecutive drops.
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive: AtomicU32::new(0),
            threshold,
        }
    }

    /// Record a discarded event. Returns true once the observer should go.
    pub fn record_drop(&self) -> bool {
        let previous = self.consecutive.fetch_add(1, Ordering::Relaxed);
        previous.saturating_add(1) >= self.threshold
    }

    /// Record a successful delivery.
    pub fn record_delivery(&self) {
        self.consecutive.store(0, Ordering::Relaxed);
    }

    /// Current consecutive drop count.
    pub fn count(&self) -> u32 {
        self.consecutive.load(Ordering::Relaxed)
    }
}

/// Identifier handed to each observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl std::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "obs_{}", self.0)
    }
}

/// Pattern for filtering events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPattern {
    /// Match all events.
    All,
    /// Match events for one session.
    BySession(SessionKey),
    /// Match events of one severity.
    BySeverity(Severity),
}

impl EventPattern {
    /// Check if an event matches this pattern.
    pub fn matches(&self, event: &SessionEvent) -> bool {
        match self {
            Self::All => true,
            Self::BySession(key) => &event.session_key == key,
            Self::BySeverity(severity) => event.severity == *severity,
        }
    }
}

struct Observer {
    sender: mpsc::Sender<SessionEvent>,
    pattern: EventPattern,
    drops: Arc<DropCounter>,
}

/// Receiving side of one observer.
pub struct EventSubscription {
    id: ObserverId,
    receiver: mpsc::Receiver<SessionEvent>,
}

impl EventSubscription {
    /// This observer's identifier.
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Receive the next event.
    ///
    /// # Errors
    ///
    /// Returns `Error::ChannelClosed` once the observer was evicted or the
    /// broadcaster dropped.
    pub async fn recv(&mut self) -> Result<SessionEvent> {
        self.receiver.recv().await.ok_or(Error::ChannelClosed)
    }

    /// Try to receive an event without waiting.
    ///
    /// # Errors
    ///
    /// Returns `Error::Empty` when nothing is queued and
    /// `Error::ChannelClosed` when the observer is gone.
    pub fn try_recv(&mut self) -> Result<SessionEvent> {
        self.receiver.try_recv().map_err(|e| match e {
            mpsc::error::TryRecvError::Empty => Error::Empty,
            mpsc::error::TryRecvError::Disconnected => Error::ChannelClosed,
        })
    }

    /// Drain everything currently queued.
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        std::iter::from_fn(|| self.try_recv().ok()).collect()
    }
}

/// Outcome of one publish call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Observers that accepted the event.
    pub delivered: usize,
    /// Observers whose full queue discarded the event.
    pub dropped: usize,
    /// Observers removed during this call (closed or too slow).
    pub evicted: usize,
}

/// Fan-out of session events to every connected observer.
pub struct EventBroadcaster {
    observers: RwLock<HashMap<ObserverId, Observer>>,
    next_id: AtomicU64,
    capacity: usize,
    max_consecutive_drops: u32,
}

impl EventBroadcaster {
    /// Create a broadcaster with default limits.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_OBSERVER_CAPACITY, DEFAULT_MAX_CONSECUTIVE_DROPS)
    }

    /// Create a broadcaster with explicit per-observer limits.
    ///
    /// A zero capacity is raised to one because tokio channels need room for
    /// at least one message.
    pub fn with_limits(capacity: usize, max_consecutive_drops: u32) -> Self {
        Self {
            observers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            capacity: capacity.max(1),
            max_consecutive_drops: max_consecutive_drops.max(1),
        }
    }

    /// Emit an event for `session_key`.
    pub async fn emit(
        &self,
        session_key: &SessionKey,
        message: impl Into<String>,
        severity: Severity,
    ) -> DeliveryReport {
        self.publish(SessionEvent::new(session_key.clone(), message, severity))
            .await
    }

    /// Publish a prepared event to every matching observer.
    pub async fn publish(&self, event: SessionEvent) -> DeliveryReport {
        match event.severity {
            Severity::Info => info!(session_key = %event.session_key, "{}", event.message),
            Severity::Error => error!(session_key = %event.session_key, "{}", event.message),
        }

        let mut report = DeliveryReport::default();
        let mut stale = Vec::new();

        {
            let observers = self.observers.read().await;
            for (id, observer) in observers
                .iter()
                .filter(|(_, obs)| obs.pattern.matches(&event))
            {
                match observer.sender.try_send(event.clone()) {
                    Ok(()) => {
                        observer.drops.record_delivery();
                        report.delivered = report.delivered.saturating_add(1);
                    }
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        report.dropped = report.dropped.saturating_add(1);
                        if observer.drops.record_drop() {
                            warn!(
                                observer = %id,
                                drops = observer.drops.count(),
                                "Evicting slow observer"
                            );
                            stale.push(*id);
                        } else {
                            debug!(
                                observer = %id,
                                drops = observer.drops.count(),
                                "Observer queue full, event discarded"
                            );
                        }
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        debug!(observer = %id, "Observer disconnected");
                        stale.push(*id);
                    }
                }
            }
        }

        if !stale.is_empty() {
            let mut observers = self.observers.write().await;
            for id in &stale {
                if observers.remove(id).is_some() {
                    report.evicted = report.evicted.saturating_add(1);
                }
            }
        }

        report
    }

    /// Subscribe to all events.
    pub async fn subscribe(&self) -> EventSubscription {
        self.subscribe_with_pattern(EventPattern::All).await
    }

    /// Subscribe to events matching a pattern.
    pub async fn subscribe_with_pattern(&self, pattern: EventPattern) -> EventSubscription {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let mut observers = self.observers.write().await;
        observers.insert(
            id,
            Observer {
                sender,
                pattern,
                drops: Arc::new(DropCounter::new(self.max_consecutive_drops)),
            },
        );
        debug!(observer = %id, total = observers.len(), "Observer connected");

        EventSubscription { id, receiver }
    }

    /// Remove an observer.
    pub async fn unsubscribe(&self, id: ObserverId) {
        let mut observers = self.observers.write().await;
        observers.remove(&id);
    }

    /// Number of connected observers.
    pub async fn observer_count(&self) -> usize {
        self.observers.read().await.len()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
