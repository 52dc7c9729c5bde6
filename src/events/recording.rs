//! Emitter that keeps every event in memory.

use std::sync::{Mutex, MutexGuard};

use super::EventEmitter;
use crate::domain::{LoopEvent, TaskKey};

/// Records events for later inspection, mainly by tests and embedders that
/// poll rather than subscribe.
#[derive(Default)]
pub struct RecordingEmitter {
    events: Mutex<Vec<LoopEvent>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LoopEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of every event so far
    pub fn events(&self) -> Vec<LoopEvent> {
        self.lock().clone()
    }

    /// Events of one task, in emission order
    pub fn events_for(&self, key: &TaskKey) -> Vec<LoopEvent> {
        self.lock().iter().filter(|e| &e.task_key() == key).cloned().collect()
    }

    /// Event type names of one task, skipping streaming output chunks
    pub fn event_types_for(&self, key: &TaskKey) -> Vec<&'static str> {
        self.lock()
            .iter()
            .filter(|e| &e.task_key() == key)
            .map(LoopEvent::event_type)
            .filter(|t| *t != "output")
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl EventEmitter for RecordingEmitter {
    fn emit(&self, event: LoopEvent) {
        self.lock().push(event);
    }
}
