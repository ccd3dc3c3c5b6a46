//! Outbound notification port
//!
//! Fire-and-forget events for collaborators outside the dispatch path.
//! Backed by a `tokio::sync::broadcast` channel: publishing never blocks and
//! is a no-op when nobody is subscribed. Slow subscribers lose old events.

use tokio::sync::broadcast;
use tracing::debug;

const DEFAULT_CAPACITY: usize = 64;

/// Events published by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    /// The personal credential failed an attempt
    PersonalCredentialInvalid,
}

impl DispatchEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            DispatchEvent::PersonalCredentialInvalid => "personal-credential-invalid",
        }
    }
}

/// Cloneable handle to the event channel.
#[derive(Clone)]
pub struct NotificationBus {
    tx: broadcast::Sender<DispatchEvent>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish without waiting for, or requiring, any receiver.
    pub fn publish(&self, event: DispatchEvent) {
        let receivers = self.tx.send(event.clone()).unwrap_or(0);
        debug!(event = event.name(), receivers, "published dispatch event");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.tx.subscribe()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}
