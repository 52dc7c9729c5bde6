//! In-memory state store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::traits::{StateStore, sort_by_start_time};
use crate::domain::{LoopState, TaskKey};
use crate::error::{RalphError, Result};

/// Map-backed store; contents are lost when dropped.
#[derive(Default)]
pub struct InMemoryStateStore {
    records: RwLock<HashMap<TaskKey, LoopState>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn save(&self, state: &LoopState) -> Result<()> {
        let mut stored = state.clone();
        stored.persistence_warning = None;
        self.records.write().await.insert(state.key(), stored);
        Ok(())
    }

    async fn get(&self, project_id: &str, task_id: &str) -> Result<Option<LoopState>> {
        let key = TaskKey::new(project_id, task_id);
        Ok(self.records.read().await.get(&key).cloned())
    }

    async fn list(&self, project_id: &str) -> Result<Vec<LoopState>> {
        let mut states: Vec<LoopState> = self
            .records
            .read()
            .await
            .values()
            .filter(|s| s.project_id == project_id)
            .cloned()
            .collect();
        sort_by_start_time(&mut states);
        Ok(states)
    }

    async fn list_all(&self) -> Result<Vec<LoopState>> {
        let mut states: Vec<LoopState> = self.records.read().await.values().cloned().collect();
        sort_by_start_time(&mut states);
        Ok(states)
    }

    async fn delete(&self, project_id: &str, task_id: &str) -> Result<()> {
        let key = TaskKey::new(project_id, task_id);
        let mut records = self.records.write().await;
        let state = records
            .get(&key)
            .ok_or_else(|| RalphError::NotFound(key.to_string()))?;
        if !state.is_terminal() {
            return Err(RalphError::InvalidState(format!(
                "cannot delete {} while {}",
                key, state.status
            )));
        }
        records.remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LoopSettings, LoopStatus};
    use chrono::{Duration, Utc};

    fn test_state(project_id: &str, task_id: &str) -> LoopState {
        LoopState::new(
            project_id,
            task_id,
            &LoopSettings {
                task_description: "Fix bug".to_string(),
                max_turns: 3,
                worker_model: "w".to_string(),
                reviewer_model: "r".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_save_get_list() {
        let store = InMemoryStateStore::new();
        let now = Utc::now();
        let mut a = test_state("proj", "a");
        a.start_time = Some(now);
        let mut b = test_state("proj", "b");
        b.start_time = Some(now - Duration::seconds(5));

        store.save(&a).await.unwrap();
        store.save(&b).await.unwrap();
        store.save(&test_state("other", "c")).await.unwrap();

        assert_eq!(store.get("proj", "a").await.unwrap(), Some(a));
        let ids: Vec<String> = store
            .list("proj")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.task_id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn test_delete_rules() {
        let store = InMemoryStateStore::new();
        let mut state = test_state("proj", "a");
        store.save(&state).await.unwrap();

        assert!(matches!(
            store.delete("proj", "a").await,
            Err(RalphError::InvalidState(_))
        ));
        assert!(matches!(
            store.delete("proj", "missing").await,
            Err(RalphError::NotFound(_))
        ));

        state.status = LoopStatus::Failed;
        store.save(&state).await.unwrap();
        store.delete("proj", "a").await.unwrap();
        assert!(store.is_empty().await);
    }
}
