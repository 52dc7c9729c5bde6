//! State store trait.

use async_trait::async_trait;

use crate::domain::LoopState;
use crate::error::Result;

/// Durable keyed persistence of one `LoopState` per (projectId, taskId).
///
/// The loop controller is the only writer for its key and never overlaps two
/// `save` calls for the same task, so implementations need no per-key lock.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Persist the full state atomically, replacing any previous record.
    async fn save(&self, state: &LoopState) -> Result<()>;

    /// Fetch one record, or `None` if it does not exist.
    async fn get(&self, project_id: &str, task_id: &str) -> Result<Option<LoopState>>;

    /// All records of a project, oldest `startTime` first.
    async fn list(&self, project_id: &str) -> Result<Vec<LoopState>>;

    /// All records across every project.
    async fn list_all(&self) -> Result<Vec<LoopState>>;

    /// Remove a terminal record.
    ///
    /// Fails with `NotFound` if absent and `InvalidState` if not terminal.
    async fn delete(&self, project_id: &str, task_id: &str) -> Result<()>;
}

/// Order states by start time, then task id for a stable listing.
pub fn sort_by_start_time(states: &mut [LoopState]) {
    states.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.task_id.cmp(&b.task_id)));
}
