//! Second delivery path: every dispatch is echoed to broadcast sinks so
//! listeners that only know the generic notification mechanism still see
//! each event.

use tokio::sync::broadcast;
use tracing::trace;

use crate::event::Event;

/// Broadcast channel capacity. Slow listeners skip old events.
pub const BROADCAST_CAPACITY: usize = 256;

/// Receives a copy of every dispatched event.
///
/// Implementations must not block and must not panic; failures are theirs
/// to swallow.
pub trait BroadcastSink: Send + Sync {
    fn publish(&self, event: &Event);
}

/// Default sink: a `tokio::sync::broadcast` bus that any number of legacy
/// listeners can attach to with [`listen`](Self::listen).
#[derive(Debug, Clone)]
pub struct BroadcastChannel {
    tx: broadcast::Sender<Event>,
}

impl BroadcastChannel {
    pub fn new() -> Self {
        Self::with_capacity(BROADCAST_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Attaches a new listener. It sees events published after this call.
    pub fn listen(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of attached listeners.
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastSink for BroadcastChannel {
    fn publish(&self, event: &Event) {
        // No listeners is the normal case for a fresh dashboard.
        if self.tx.send(event.clone()).is_err() {
            trace!(event = %event.event_type, "no broadcast listeners");
        }
    }
}
