//! Bridge implementation that maps domain events to broadcast transport.
//!
//! The [`BroadcastEventBridge`] lives at the boundary between domain services
//! and transport concerns, mapping typed domain events to a broadcast channel
//! a future push transport (SSE, WebSocket) could subscribe to.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::emitter::EventEmitter;
use super::{BroadcastEvent, IngestEvent, JobEvent, QueueEvent};

/// Bridges domain events to a broadcast channel.
///
/// # Thread Safety
///
/// The bridge is `Send + Sync` and can be shared across async tasks.
/// The external emitter uses `RwLock` to allow setting it after construction.
#[derive(Clone)]
pub struct BroadcastEventBridge {
    tx: broadcast::Sender<BroadcastEvent>,
    external_emitter: Arc<RwLock<Option<Arc<dyn EventEmitter>>>>,
}

impl BroadcastEventBridge {
    /// Creates a new bridge with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            external_emitter: Arc::new(RwLock::new(None)),
        }
    }

    /// Sets an external emitter that receives events in addition to the
    /// broadcast channel. Can be set after construction.
    pub fn set_external_emitter(&self, emitter: Arc<dyn EventEmitter>) {
        *self.external_emitter.write() = Some(emitter);
    }

    /// Returns a new receiver for the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }
}

/// Generates an [`EventEmitter`] method that forwards to the external emitter
/// (if set) and then sends to the broadcast channel.
macro_rules! impl_emit {
    ($method:ident, $event_ty:ty, $variant:ident) => {
        fn $method(&self, event: $event_ty) {
            if let Some(ref emitter) = *self.external_emitter.read() {
                emitter.$method(event.clone());
            }
            if let Err(e) = self.tx.send(BroadcastEvent::$variant(event)) {
                log::trace!("[EventBridge] No broadcast receivers: {}", e);
            }
        }
    };
}

impl EventEmitter for BroadcastEventBridge {
    impl_emit!(emit_ingest, IngestEvent, Ingest);
    impl_emit!(emit_job, JobEvent, Job);
    impl_emit!(emit_queue, QueueEvent, Queue);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_forwards_to_broadcast_channel() {
        let bridge = BroadcastEventBridge::new(8);
        let mut rx = bridge.subscribe();

        bridge.emit_job(JobEvent::StateChanged {
            identifier: "abcDEF12345".into(),
            state: "completed".into(),
            timestamp: 0,
        });

        let received = rx.try_recv().expect("event should be delivered");
        assert!(matches!(received, BroadcastEvent::Job(_)));
    }

    #[test]
    fn send_with_no_receivers_does_not_panic() {
        let bridge = BroadcastEventBridge::new(8);
        bridge.emit_queue(QueueEvent::Appended {
            entry_id: 1,
            timestamp: 0,
        });
    }
}
