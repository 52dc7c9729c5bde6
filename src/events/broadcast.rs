//! Fan-out emitter over a tokio broadcast channel.

use tokio::sync::broadcast;

use super::EventEmitter;
use crate::domain::LoopEvent;

/// Every subscriber sees events in send order, so each task's stream stays
/// ordered. Slow subscribers lag and lose the oldest events.
pub struct BroadcastEmitter {
    event_tx: broadcast::Sender<LoopEvent>,
}

impl BroadcastEmitter {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Self { event_tx }
    }

    pub fn receiver_count(&self) -> usize {
        self.event_tx.receiver_count()
    }
}

impl EventEmitter for BroadcastEmitter {
    fn emit(&self, event: LoopEvent) {
        if self.event_tx.send(event).is_err() {
            // No receivers
            log::trace!("Dropped event with no subscribers");
        }
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<LoopEvent>> {
        Some(self.event_tx.subscribe())
    }
}
