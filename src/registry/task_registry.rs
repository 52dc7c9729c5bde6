//! Task Registry implementation
//!
//! TaskRegistry owns the map of live loop controllers keyed by
//! (projectId, taskId). It enforces one active loop per project, routes
//! control requests to the right controller and reads through to the
//! state store once a loop has finished and deregistered.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, broadcast};

use crate::agent::AgentRunner;
use crate::config::{Config, LoopDefaults};
use crate::controller::{ControllerDeps, LoopController, LoopHandle};
use crate::domain::{LoopEvent, LoopState, LoopStatus, StartConfig, TaskKey};
use crate::error::{RalphError, Result};
use crate::events::EventEmitter;
use crate::governor::SessionGovernor;
use crate::id::{generate_task_id, validate_id};
use crate::phase::{AgentCaller, RetryPolicy, ReviewerExecutor, WorkerExecutor};
use crate::storage::{StateStore, sort_by_start_time};

/// Error recorded on loops found unfinished after a restart
pub const INTERRUPTED_BY_RESTART: &str = "interrupted: process restarted";

type LoopMap = HashMap<TaskKey, LoopHandle>;

/// Directory of live loop controllers
pub struct TaskRegistry {
    deps: ControllerDeps,
    defaults: LoopDefaults,
    loops: Arc<Mutex<LoopMap>>,
}

impl TaskRegistry {
    /// Create a new TaskRegistry with the given dependencies
    pub fn new(deps: ControllerDeps, defaults: LoopDefaults) -> Self {
        Self {
            deps,
            defaults,
            loops: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wire executors, governor and retry policy from configuration
    pub fn from_config(
        config: &Config,
        store: Arc<dyn StateStore>,
        runner: Arc<dyn AgentRunner>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        let governor = SessionGovernor::new(config.concurrency.max_agent_sessions);
        let caller = AgentCaller::new(runner, governor, RetryPolicy::from(&config.retry), emitter.clone());
        let deps = ControllerDeps {
            store,
            emitter,
            worker: WorkerExecutor::new(caller.clone()),
            reviewer: ReviewerExecutor::new(caller),
        };
        Self::new(deps, config.loop_defaults.clone())
    }

    /// Start a new loop for a project and return its initial state.
    pub async fn start(&self, project_id: &str, config: StartConfig) -> Result<LoopState> {
        validate_id("projectId", project_id)?;
        let settings = config.resolve(&self.defaults)?;

        let mut loops = self.loops.lock().await;
        if let Some(active) = loops
            .values()
            .find(|h| h.key().project_id == project_id && !h.is_terminal())
        {
            log::warn!("Rejected start for {}: {} is still active", project_id, active.key());
            return Err(RalphError::ConcurrencyConflict {
                project_id: project_id.to_string(),
                task_id: active.key().task_id.clone(),
            });
        }

        let mut task_id = generate_task_id();
        while loops.contains_key(&TaskKey::new(project_id, &task_id)) {
            task_id = generate_task_id();
        }

        let state = LoopState::new(project_id, &task_id, &settings);
        let key = state.key();
        let (mut controller, handle) = LoopController::new(state, self.deps.clone());
        let initial = controller.start().await?;
        loops.insert(key.clone(), handle);

        let registry_loops = Arc::clone(&self.loops);
        tokio::spawn(async move {
            let final_state = controller.run().await;
            registry_loops.lock().await.remove(&key);
            log::debug!("Deregistered {} ({})", key, final_state.status);
        });

        log::info!("Registered {} ({} active)", initial.key(), loops.len());
        Ok(initial)
    }

    /// Stop a loop; any in-flight agent call is cancelled.
    pub async fn stop(&self, project_id: &str, task_id: &str) -> Result<()> {
        let handle = self.live_handle(project_id, task_id, "stop").await?;
        handle.stop()
    }

    /// Pause a loop at its next phase boundary.
    pub async fn pause(&self, project_id: &str, task_id: &str) -> Result<()> {
        let handle = self.live_handle(project_id, task_id, "pause").await?;
        handle.pause()
    }

    /// Resume a paused loop.
    pub async fn resume(&self, project_id: &str, task_id: &str) -> Result<()> {
        let handle = self.live_handle(project_id, task_id, "resume").await?;
        handle.resume()
    }

    /// Live view while registered, otherwise the persisted record.
    pub async fn get(&self, project_id: &str, task_id: &str) -> Result<LoopState> {
        let key = checked_key(project_id, task_id)?;
        let live = self.loops.lock().await.get(&key).map(LoopHandle::snapshot);
        let state = match live {
            Some(state) => state,
            None => self
                .deps
                .store
                .get(project_id, task_id)
                .await?
                .ok_or_else(|| RalphError::NotFound(key.to_string()))?,
        };
        warn_if_stale(&state);
        Ok(state)
    }

    /// Every loop of a project, oldest first, live views over persisted records.
    pub async fn list(&self, project_id: &str) -> Result<Vec<LoopState>> {
        validate_id("projectId", project_id)?;
        let mut by_key: HashMap<TaskKey, LoopState> = self
            .deps
            .store
            .list(project_id)
            .await?
            .into_iter()
            .map(|s| (s.key(), s))
            .collect();

        for handle in self.loops.lock().await.values() {
            if handle.key().project_id == project_id {
                by_key.insert(handle.key().clone(), handle.snapshot());
            }
        }

        let mut states: Vec<LoopState> = by_key.into_values().collect();
        sort_by_start_time(&mut states);
        states.iter().for_each(warn_if_stale);
        Ok(states)
    }

    /// Delete a finished loop's record.
    pub async fn delete(&self, project_id: &str, task_id: &str) -> Result<()> {
        let key = checked_key(project_id, task_id)?;
        {
            let mut loops = self.loops.lock().await;
            if let Some(handle) = loops.get(&key) {
                if !handle.is_terminal() {
                    return Err(RalphError::InvalidState(format!(
                        "cannot delete {}: loop is still running ({})",
                        key,
                        handle.status()
                    )));
                }
                // Terminal view is already persisted; deregistration just hasn't run yet
                loops.remove(&key);
            }
        }
        self.deps.store.delete(project_id, task_id).await
    }

    /// Resolve once the loop is terminal.
    pub async fn wait(&self, project_id: &str, task_id: &str) -> Result<LoopState> {
        let key = checked_key(project_id, task_id)?;
        let handle = self.loops.lock().await.get(&key).cloned();
        match handle {
            Some(handle) => Ok(handle.wait().await),
            None => self.get(project_id, task_id).await,
        }
    }

    /// Observe the event stream, when the emitter supports subscriptions.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<LoopEvent>> {
        self.deps.emitter.subscribe()
    }

    /// Number of loops currently registered
    pub async fn active_count(&self) -> usize {
        self.loops.lock().await.len()
    }

    /// Finalize persisted loops left unfinished by a previous process.
    ///
    /// Call once at startup, before any `start()`.
    pub async fn recover_orphans(&self) -> Result<Vec<LoopState>> {
        let loops = self.loops.lock().await;
        let mut recovered = Vec::new();

        for mut state in self.deps.store.list_all().await? {
            if state.is_terminal() || loops.contains_key(&state.key()) {
                continue;
            }
            log::warn!("Recovering orphaned loop {} (was {})", state.key(), state.status);
            state.status = LoopStatus::Failed;
            state.final_result = None;
            state.error = Some(INTERRUPTED_BY_RESTART.to_string());
            state.end_time = Some(Utc::now());
            self.deps.store.save(&state).await?;
            self.deps.emitter.emit(LoopEvent::error(&state, INTERRUPTED_BY_RESTART));
            self.deps.emitter.emit(LoopEvent::complete(&state));
            recovered.push(state);
        }

        if !recovered.is_empty() {
            log::info!("Recovered {} orphaned loop(s)", recovered.len());
        }
        Ok(recovered)
    }

    async fn live_handle(&self, project_id: &str, task_id: &str, action: &str) -> Result<LoopHandle> {
        let key = checked_key(project_id, task_id)?;
        if let Some(handle) = self.loops.lock().await.get(&key) {
            return Ok(handle.clone());
        }

        match self.deps.store.get(project_id, task_id).await? {
            Some(state) if state.is_terminal() => Err(RalphError::InvalidState(format!(
                "cannot {} {}: loop already {}",
                action, key, state.status
            ))),
            Some(state) => Err(RalphError::InvalidState(format!(
                "cannot {} {}: no live controller (persisted status {})",
                action, key, state.status
            ))),
            None => Err(RalphError::NotFound(key.to_string())),
        }
    }
}

fn checked_key(project_id: &str, task_id: &str) -> Result<TaskKey> {
    validate_id("projectId", project_id)?;
    validate_id("taskId", task_id)?;
    Ok(TaskKey::new(project_id, task_id))
}

fn warn_if_stale(state: &LoopState) {
    if let Some(warning) = &state.persistence_warning {
        log::warn!("{} persisted state may be stale: {}", state.key(), warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ScriptedAgentRunner;
    use crate::domain::{FinalResult, LoopSettings, ReviewDecision};
    use crate::events::RecordingEmitter;
    use crate::storage::InMemoryStateStore;

    struct TestDeps {
        runner: Arc<ScriptedAgentRunner>,
        store: Arc<InMemoryStateStore>,
        emitter: Arc<RecordingEmitter>,
    }

    fn create_test_registry(runner: ScriptedAgentRunner) -> (TaskRegistry, TestDeps) {
        let runner = Arc::new(runner);
        let store = Arc::new(InMemoryStateStore::new());
        let emitter = Arc::new(RecordingEmitter::new());
        let mut config = Config::default();
        config.retry = crate::config::RetryConfig {
            max_attempts: 2,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        };
        let registry = TaskRegistry::from_config(&config, store.clone(), runner.clone(), emitter.clone());
        (registry, TestDeps { runner, store, emitter })
    }

    fn orphan(project_id: &str, task_id: &str, status: LoopStatus) -> LoopState {
        let mut state = LoopState::new(
            project_id,
            task_id,
            &LoopSettings {
                task_description: "Fix bug".to_string(),
                max_turns: 3,
                worker_model: "w".to_string(),
                reviewer_model: "r".to_string(),
            },
        );
        state.status = status;
        state.start_time = Some(Utc::now());
        state
    }

    #[tokio::test]
    async fn test_start_returns_initial_state() {
        let (registry, test) = create_test_registry(ScriptedAgentRunner::new().gated());

        let state = registry
            .start("proj", StartConfig::new("Fix bug").with_max_turns(3))
            .await
            .unwrap();
        assert_eq!(state.status, LoopStatus::WorkerRunning);
        assert_eq!(state.current_iteration, 1);
        assert_eq!(state.max_turns, 3);
        assert!(state.task_id.starts_with("task-"));
        assert_eq!(registry.active_count().await, 1);

        let stored = test.store.get("proj", &state.task_id).await.unwrap().unwrap();
        assert_eq!(stored.status, LoopStatus::WorkerRunning);

        registry.stop("proj", &state.task_id).await.unwrap();
        registry.wait("proj", &state.task_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_start_applies_config_defaults() {
        let (registry, _test) = create_test_registry(ScriptedAgentRunner::new());
        let state = registry.start("proj", StartConfig::new("Fix bug")).await.unwrap();
        assert_eq!(state.max_turns, 5);
        assert_eq!(state.worker_model, crate::config::DEFAULT_WORKER_MODEL);
        assert_eq!(state.reviewer_model, crate::config::DEFAULT_REVIEWER_MODEL);
        registry.wait("proj", &state.task_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_start_validation_creates_nothing() {
        let (registry, test) = create_test_registry(ScriptedAgentRunner::new());

        let empty = registry.start("proj", StartConfig::new("")).await;
        assert!(matches!(empty, Err(RalphError::Validation(_))));
        let zero = registry
            .start("proj", StartConfig::new("Fix bug").with_max_turns(0))
            .await;
        assert!(matches!(zero, Err(RalphError::Validation(_))));
        let bad_project = registry.start("../proj", StartConfig::new("Fix bug")).await;
        assert!(matches!(bad_project, Err(RalphError::Validation(_))));

        assert!(test.store.is_empty().await);
        assert_eq!(registry.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrency_conflict_leaves_existing_loop_untouched() {
        let (registry, test) = create_test_registry(ScriptedAgentRunner::new().gated());
        let first = registry.start("proj", StartConfig::new("Fix bug")).await.unwrap();
        test.runner.wait_for_calls(1).await;
        let before = registry.get("proj", &first.task_id).await.unwrap();

        let second = registry.start("proj", StartConfig::new("Other task")).await;
        match second {
            Err(RalphError::ConcurrencyConflict { project_id, task_id }) => {
                assert_eq!(project_id, "proj");
                assert_eq!(task_id, first.task_id);
            }
            other => panic!("expected conflict, got {:?}", other),
        }

        let after = registry.get("proj", &first.task_id).await.unwrap();
        assert_eq!(after.status, before.status);
        assert_eq!(after.current_iteration, before.current_iteration);
        assert_eq!(after.iterations, before.iterations);
        assert_eq!(registry.list("proj").await.unwrap().len(), 1);

        // Other projects are unaffected
        let other = registry.start("other", StartConfig::new("Fix bug")).await.unwrap();
        registry.stop("other", &other.task_id).await.unwrap();
        registry.stop("proj", &first.task_id).await.unwrap();
        registry.wait("proj", &first.task_id).await.unwrap();
        registry.wait("other", &other.task_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_start_allowed_after_previous_loop_finished() {
        let runner = ScriptedAgentRunner::new();
        runner.reviewer_decides(ReviewDecision::Approve, "ok");
        let (registry, _test) = create_test_registry(runner);

        let first = registry.start("proj", StartConfig::new("Fix bug")).await.unwrap();
        registry.wait("proj", &first.task_id).await.unwrap();

        let second = registry.start("proj", StartConfig::new("Next task")).await.unwrap();
        registry.wait("proj", &second.task_id).await.unwrap();
        assert_eq!(registry.list("proj").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_control_unknown_task_not_found() {
        let (registry, _test) = create_test_registry(ScriptedAgentRunner::new());
        assert!(matches!(registry.stop("proj", "nope").await, Err(RalphError::NotFound(_))));
        assert!(matches!(registry.pause("proj", "nope").await, Err(RalphError::NotFound(_))));
        assert!(matches!(registry.resume("proj", "nope").await, Err(RalphError::NotFound(_))));
        assert!(matches!(registry.get("proj", "nope").await, Err(RalphError::NotFound(_))));
        assert!(matches!(registry.delete("proj", "nope").await, Err(RalphError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_control_finished_task_invalid_state() {
        let runner = ScriptedAgentRunner::new();
        runner.reviewer_decides(ReviewDecision::Approve, "ok");
        let (registry, _test) = create_test_registry(runner);

        let state = registry.start("proj", StartConfig::new("Fix bug")).await.unwrap();
        let done = registry.wait("proj", &state.task_id).await.unwrap();
        assert_eq!(done.final_result, Some(FinalResult::Approved));

        assert!(matches!(
            registry.pause("proj", &state.task_id).await,
            Err(RalphError::InvalidState(_))
        ));
        assert!(matches!(
            registry.resume("proj", &state.task_id).await,
            Err(RalphError::InvalidState(_))
        ));
        assert!(matches!(
            registry.stop("proj", &state.task_id).await,
            Err(RalphError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_rules() {
        let (registry, test) = create_test_registry(ScriptedAgentRunner::new().gated());
        let state = registry.start("proj", StartConfig::new("Fix bug")).await.unwrap();
        test.runner.wait_for_calls(1).await;

        assert!(matches!(
            registry.delete("proj", &state.task_id).await,
            Err(RalphError::InvalidState(_))
        ));

        registry.stop("proj", &state.task_id).await.unwrap();
        registry.wait("proj", &state.task_id).await.unwrap();

        registry.delete("proj", &state.task_id).await.unwrap();
        assert!(matches!(
            registry.get("proj", &state.task_id).await,
            Err(RalphError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_delete_right_after_wait_succeeds() {
        let runner = ScriptedAgentRunner::new();
        for _ in 0..50 {
            runner.reviewer_decides(ReviewDecision::Approve, "ok");
        }
        let (registry, test) = create_test_registry(runner);

        for _ in 0..50 {
            let state = registry.start("proj", StartConfig::new("Fix bug")).await.unwrap();
            let done = registry.wait("proj", &state.task_id).await.unwrap();
            assert_eq!(done.final_result, Some(FinalResult::Approved));
            registry.delete("proj", &state.task_id).await.unwrap();
        }

        assert!(test.store.is_empty().await);
        assert_eq!(registry.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_persisted_record_matches_final_view() {
        let (registry, test) = create_test_registry(ScriptedAgentRunner::new());
        let state = registry
            .start("proj", StartConfig::new("Fix bug").with_max_turns(2))
            .await
            .unwrap();
        let live = registry.wait("proj", &state.task_id).await.unwrap();

        let persisted = test.store.get("proj", &state.task_id).await.unwrap().unwrap();
        assert_eq!(persisted, live);
        assert_eq!(persisted.final_result, Some(FinalResult::MaxTurnsReached));
    }

    #[tokio::test]
    async fn test_recover_orphans() {
        let (registry, test) = create_test_registry(ScriptedAgentRunner::new());
        test.store
            .save(&orphan("proj", "task-a", LoopStatus::WorkerRunning))
            .await
            .unwrap();
        test.store
            .save(&orphan("proj", "task-b", LoopStatus::Completed))
            .await
            .unwrap();
        test.store
            .save(&orphan("other", "task-c", LoopStatus::Paused))
            .await
            .unwrap();

        let recovered = registry.recover_orphans().await.unwrap();
        assert_eq!(recovered.len(), 2);

        let a = registry.get("proj", "task-a").await.unwrap();
        assert_eq!(a.status, LoopStatus::Failed);
        assert_eq!(a.error.as_deref(), Some(INTERRUPTED_BY_RESTART));
        assert!(a.final_result.is_none());
        assert!(a.end_time.is_some());

        let b = registry.get("proj", "task-b").await.unwrap();
        assert_eq!(b.status, LoopStatus::Completed);

        registry.delete("other", "task-c").await.unwrap();
        assert!(
            test.emitter
                .event_types_for(&TaskKey::new("proj", "task-a"))
                .contains(&"complete")
        );
    }

    #[tokio::test]
    async fn test_orphan_control_is_invalid_state() {
        let (registry, test) = create_test_registry(ScriptedAgentRunner::new());
        test.store
            .save(&orphan("proj", "task-a", LoopStatus::Paused))
            .await
            .unwrap();
        assert!(matches!(
            registry.resume("proj", "task-a").await,
            Err(RalphError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_subscribe_depends_on_emitter() {
        let (registry, _test) = create_test_registry(ScriptedAgentRunner::new());
        assert!(registry.subscribe().is_none());
    }
}
