//! Event emission
//!
//! The controller pushes `LoopEvent`s through an `EventEmitter` after each
//! persisted transition. Emission is fire-and-forget: an emitter must not
//! block the loop and must not fail it.

mod broadcast;
mod recording;

pub use self::broadcast::BroadcastEmitter;
pub use self::recording::RecordingEmitter;

use tokio::sync::broadcast::Receiver;

use crate::domain::LoopEvent;

pub trait EventEmitter: Send + Sync {
    /// Publish one event. Called from the loop's own task, in transition order.
    fn emit(&self, event: LoopEvent);

    /// Live subscription, for emitters that fan out to receivers.
    fn subscribe(&self) -> Option<Receiver<LoopEvent>> {
        None
    }
}
