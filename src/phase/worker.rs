//! Worker phase executor.

use tokio_util::sync::CancellationToken;

use super::prompt::build_worker_prompt;
use super::{AgentCaller, PhaseOutcome};
use crate::agent::{AgentRequest, AgentRole};
use crate::domain::{LoopState, OutputSource, WorkerOutput};

/// Runs the worker agent for the next iteration of a loop.
#[derive(Clone)]
pub struct WorkerExecutor {
    caller: AgentCaller,
}

impl WorkerExecutor {
    pub fn new(caller: AgentCaller) -> Self {
        Self { caller }
    }

    /// Attempt the task once, with the full iteration history as context.
    pub async fn execute(&self, state: &LoopState, cancel: &CancellationToken) -> PhaseOutcome<WorkerOutput> {
        let request = AgentRequest {
            role: AgentRole::Worker,
            model: state.worker_model.clone(),
            prompt: build_worker_prompt(state),
        };

        log::debug!(
            "{} worker phase for iteration {} (model={})",
            state.key(),
            state.next_worker_iteration(),
            state.worker_model
        );

        match self.caller.call(&state.key(), OutputSource::Worker, request, cancel).await {
            PhaseOutcome::Completed(response) => PhaseOutcome::Completed(WorkerOutput {
                result: response.content,
                files_modified: response.files_modified,
            }),
            PhaseOutcome::Cancelled => PhaseOutcome::Cancelled,
            PhaseOutcome::Failed(error) => PhaseOutcome::Failed(format!("Worker phase failed: {}", error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentError, AgentResponse, ScriptStep, ScriptedAgentRunner};
    use crate::domain::LoopSettings;
    use crate::events::RecordingEmitter;
    use crate::governor::SessionGovernor;
    use crate::phase::RetryPolicy;
    use std::sync::Arc;

    fn state() -> LoopState {
        LoopState::new(
            "proj",
            "task-1",
            &LoopSettings {
                task_description: "Fix bug".to_string(),
                max_turns: 3,
                worker_model: "worker-x".to_string(),
                reviewer_model: "reviewer-y".to_string(),
            },
        )
    }

    fn executor(runner: Arc<ScriptedAgentRunner>) -> WorkerExecutor {
        WorkerExecutor::new(AgentCaller::new(
            runner,
            SessionGovernor::new(1),
            RetryPolicy::immediate(2),
            Arc::new(RecordingEmitter::new()),
        ))
    }

    #[tokio::test]
    async fn test_worker_output_from_response() {
        let runner = Arc::new(ScriptedAgentRunner::new());
        runner.push(
            AgentRole::Worker,
            ScriptStep::Respond(AgentResponse::text("fixed it").with_files(["src/main.rs"])),
        );

        let outcome = executor(runner.clone())
            .execute(&state(), &CancellationToken::new())
            .await;

        assert_eq!(
            outcome,
            PhaseOutcome::Completed(WorkerOutput {
                result: "fixed it".to_string(),
                files_modified: vec!["src/main.rs".to_string()],
            })
        );
        let calls = runner.calls();
        assert_eq!(calls[0].model, "worker-x");
        assert_eq!(calls[0].role, AgentRole::Worker);
        assert!(calls[0].prompt.contains("Fix bug"));
    }

    #[tokio::test]
    async fn test_worker_failure_is_prefixed() {
        let runner = Arc::new(ScriptedAgentRunner::new());
        runner.worker_fails(AgentError::Fatal("no credits".into()));

        let outcome = executor(runner).execute(&state(), &CancellationToken::new()).await;
        assert_eq!(
            outcome,
            PhaseOutcome::Failed("Worker phase failed: Agent failed: no credits".to_string())
        );
    }
}
