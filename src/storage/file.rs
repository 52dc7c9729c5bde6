//! File-backed state store.
//!
//! Layout: `{root}/{projectId}/{taskId}.json`. Saves go to a sibling
//! `.tmp` file that is fsynced and then renamed over the target, so a
//! crash leaves either the old record or the new one.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::traits::{StateStore, sort_by_start_time};
use crate::domain::LoopState;
use crate::error::{RalphError, Result};
use crate::id::validate_id;

const RECORD_EXT: &str = "json";

pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        log::debug!("FileStateStore rooted at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn project_dir(&self, project_id: &str) -> PathBuf {
        self.root.join(project_id)
    }

    fn record_path(&self, project_id: &str, task_id: &str) -> PathBuf {
        self.project_dir(project_id).join(format!("{}.{}", task_id, RECORD_EXT))
    }

    async fn read_record(path: &Path) -> Result<Option<LoopState>> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(RalphError::Persistence(format!("read {}: {}", path.display(), e)));
            }
        };
        let state = serde_json::from_str(&content)
            .map_err(|e| RalphError::Persistence(format!("parse {}: {}", path.display(), e)))?;
        Ok(Some(state))
    }

    async fn read_project_dir(dir: &Path) -> Result<Vec<LoopState>> {
        let mut states = Vec::new();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(states),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != RECORD_EXT) {
                continue;
            }
            match Self::read_record(&path).await {
                Ok(Some(state)) => states.push(state),
                Ok(None) => {}
                Err(e) => log::warn!("Skipping unreadable state file: {}", e),
            }
        }
        Ok(states)
    }

    async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension(format!("{}.tmp", RECORD_EXT));
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn save(&self, state: &LoopState) -> Result<()> {
        validate_id("projectId", &state.project_id)?;
        validate_id("taskId", &state.task_id)?;

        let path = self.record_path(&state.project_id, &state.task_id);
        let bytes = serde_json::to_vec_pretty(state)?;
        Self::write_atomic(&path, &bytes)
            .await
            .map_err(|e| RalphError::Persistence(format!("write {}: {}", path.display(), e)))?;

        log::debug!("Saved {} (status={})", state.key(), state.status);
        Ok(())
    }

    async fn get(&self, project_id: &str, task_id: &str) -> Result<Option<LoopState>> {
        validate_id("projectId", project_id)?;
        validate_id("taskId", task_id)?;
        Self::read_record(&self.record_path(project_id, task_id)).await
    }

    async fn list(&self, project_id: &str) -> Result<Vec<LoopState>> {
        validate_id("projectId", project_id)?;
        let mut states = Self::read_project_dir(&self.project_dir(project_id)).await?;
        sort_by_start_time(&mut states);
        Ok(states)
    }

    async fn list_all(&self) -> Result<Vec<LoopState>> {
        let mut states = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                states.extend(Self::read_project_dir(&entry.path()).await?);
            }
        }
        sort_by_start_time(&mut states);
        Ok(states)
    }

    async fn delete(&self, project_id: &str, task_id: &str) -> Result<()> {
        let state = self
            .get(project_id, task_id)
            .await?
            .ok_or_else(|| RalphError::NotFound(format!("{}/{}", project_id, task_id)))?;

        if !state.is_terminal() {
            return Err(RalphError::InvalidState(format!(
                "cannot delete {} while {}",
                state.key(),
                state.status
            )));
        }

        let path = self.record_path(project_id, task_id);
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| RalphError::Persistence(format!("remove {}: {}", path.display(), e)))?;

        log::info!("Deleted {}", state.key());
        Ok(())
    }
}
