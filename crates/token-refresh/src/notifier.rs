//! Session expiry notification
//!
//! The host subscribes to learn when the refresh token is dead so it can
//! send the user back through login. The coordinator fires at most once per
//! transition into the expired state.

use tokio::sync::broadcast;
use tracing::debug;

/// Events published by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryEvent {
    RefreshTokenExpired,
}

impl ExpiryEvent {
    /// Stable event name for logs and host routing.
    pub fn name(&self) -> &'static str {
        match self {
            ExpiryEvent::RefreshTokenExpired => "refresh-token-expired",
        }
    }
}

/// Fire-and-forget sink for expiry events. Must not block.
pub trait ExpiryNotifier: Send + Sync {
    fn notify(&self, event: ExpiryEvent);
}

impl<F> ExpiryNotifier for F
where
    F: Fn(ExpiryEvent) + Send + Sync,
{
    fn notify(&self, event: ExpiryEvent) {
        self(event)
    }
}

/// Typed event channel; any number of host tasks may subscribe.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<ExpiryEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExpiryEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(16)
    }
}

impl ExpiryNotifier for BroadcastNotifier {
    fn notify(&self, event: ExpiryEvent) {
        // No subscribers is fine: the event is advisory
        let receivers = self.tx.send(event).unwrap_or(0);
        debug!(event = event.name(), receivers, "published expiry event");
    }
}
