//! Phase executors
//!
//! Each executor wraps one logical agent call: it acquires a session slot,
//! calls the Agent Runner, forwards streaming output as events, retries
//! transient failures with backoff and interprets the result.

mod prompt;
mod retry;
mod reviewer;
mod worker;

pub use prompt::{build_reviewer_prompt, build_worker_prompt};
pub use retry::RetryPolicy;
pub use reviewer::{ReviewVerdict, ReviewerExecutor, UNPARSEABLE_FEEDBACK, parse_review};
pub use worker::WorkerExecutor;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentError, AgentRequest, AgentResponse, AgentRunner};
use crate::domain::{LoopEvent, OutputSource, TaskKey};
use crate::events::EventEmitter;
use crate::governor::SessionGovernor;

/// Buffered output chunks per call before the runner is backpressured
const OUTPUT_BUFFER: usize = 64;

/// Result of running one phase
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseOutcome<T> {
    Completed(T),
    /// Cancellation token fired before the phase produced a result
    Cancelled,
    /// Unrecoverable error, or transient errors after the attempt budget
    Failed(String),
}

/// Shared call path used by both executors
#[derive(Clone)]
pub struct AgentCaller {
    runner: Arc<dyn AgentRunner>,
    governor: SessionGovernor,
    retry: RetryPolicy,
    emitter: Arc<dyn EventEmitter>,
}

impl AgentCaller {
    pub fn new(
        runner: Arc<dyn AgentRunner>,
        governor: SessionGovernor,
        retry: RetryPolicy,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            runner,
            governor,
            retry,
            emitter,
        }
    }

    /// Call the runner, retrying transient failures.
    pub async fn call(
        &self,
        key: &TaskKey,
        source: OutputSource,
        request: AgentRequest,
        cancel: &CancellationToken,
    ) -> PhaseOutcome<AgentResponse> {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let Some(permit) = self.governor.acquire(cancel).await else {
                return PhaseOutcome::Cancelled;
            };
            let result = self.attempt(key, source, request.clone(), cancel).await;
            drop(permit);

            match result {
                Ok(response) => return PhaseOutcome::Completed(response),
                Err(AgentError::Cancelled) => return PhaseOutcome::Cancelled,
                Err(e) if e.is_retryable() && self.retry.should_retry(attempt) => {
                    log::warn!(
                        "{} {} call failed (attempt {}/{}): {}; retrying in {:?}",
                        key,
                        request.role,
                        attempt,
                        self.retry.max_attempts,
                        e,
                        self.retry.backoff(attempt)
                    );
                    if self.retry.wait(attempt, cancel).await {
                        return PhaseOutcome::Cancelled;
                    }
                }
                Err(e) if e.is_retryable() => {
                    log::error!("{} {} call failed after {} attempts: {}", key, request.role, attempt, e);
                    return PhaseOutcome::Failed(format!("{} (after {} attempts)", e, attempt));
                }
                Err(e) => {
                    log::error!("{} {} call failed: {}", key, request.role, e);
                    return PhaseOutcome::Failed(e.to_string());
                }
            }
        }
    }

    /// One runner call with its output chunks forwarded as events.
    async fn attempt(
        &self,
        key: &TaskKey,
        source: OutputSource,
        request: AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse, AgentError> {
        let (output_tx, mut output_rx) = mpsc::channel::<String>(OUTPUT_BUFFER);

        let call = self.runner.run(request, output_tx, cancel.clone());
        let forward = async {
            while let Some(chunk) = output_rx.recv().await {
                self.emitter.emit(LoopEvent::output(key, source, chunk));
            }
        };

        let (result, ()) = tokio::join!(call, forward);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentRole, ScriptedAgentRunner};
    use crate::events::RecordingEmitter;

    fn request() -> AgentRequest {
        AgentRequest {
            role: AgentRole::Worker,
            model: "m".to_string(),
            prompt: "p".to_string(),
        }
    }

    fn caller(runner: Arc<ScriptedAgentRunner>, emitter: Arc<RecordingEmitter>, attempts: u32) -> AgentCaller {
        AgentCaller::new(runner, SessionGovernor::new(2), RetryPolicy::immediate(attempts), emitter)
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let runner = Arc::new(ScriptedAgentRunner::new());
        runner
            .worker_fails(AgentError::Connection("reset".into()))
            .worker_fails(AgentError::RateLimited("429".into()))
            .worker_responds("ok");
        let emitter = Arc::new(RecordingEmitter::new());
        let caller = caller(runner.clone(), emitter.clone(), 3);

        let key = TaskKey::new("p", "t");
        let outcome = caller
            .call(&key, OutputSource::Worker, request(), &CancellationToken::new())
            .await;

        assert_eq!(outcome, PhaseOutcome::Completed(AgentResponse::text("ok")));
        assert_eq!(runner.call_count(), 3);
        assert_eq!(
            emitter.events(),
            vec![LoopEvent::output(&key, OutputSource::Worker, "ok".to_string())]
        );
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let runner = Arc::new(ScriptedAgentRunner::new());
        for _ in 0..3 {
            runner.worker_fails(AgentError::Connection("reset".into()));
        }
        let caller = caller(runner.clone(), Arc::new(RecordingEmitter::new()), 2);

        let outcome = caller
            .call(&TaskKey::new("p", "t"), OutputSource::Worker, request(), &CancellationToken::new())
            .await;

        match outcome {
            PhaseOutcome::Failed(message) => assert!(message.contains("after 2 attempts")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(runner.call_count(), 2);
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let runner = Arc::new(ScriptedAgentRunner::new());
        runner.worker_fails(AgentError::Fatal("bad credentials".into()));
        let caller = caller(runner.clone(), Arc::new(RecordingEmitter::new()), 5);

        let outcome = caller
            .call(&TaskKey::new("p", "t"), OutputSource::Worker, request(), &CancellationToken::new())
            .await;

        assert_eq!(outcome, PhaseOutcome::Failed("Agent failed: bad credentials".to_string()));
        assert_eq!(runner.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let runner = Arc::new(ScriptedAgentRunner::new());
        let caller = caller(runner.clone(), Arc::new(RecordingEmitter::new()), 3);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = caller
            .call(&TaskKey::new("p", "t"), OutputSource::Worker, request(), &cancel)
            .await;
        assert_eq!(outcome, PhaseOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let runner = Arc::new(ScriptedAgentRunner::new());
        runner.worker_fails(AgentError::Timeout(std::time::Duration::from_secs(1)));
        let caller = AgentCaller::new(
            runner.clone(),
            SessionGovernor::new(1),
            RetryPolicy {
                max_attempts: 3,
                initial_backoff_ms: 60_000,
                max_backoff_ms: 60_000,
            },
            Arc::new(RecordingEmitter::new()),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let outcome = caller
            .call(&TaskKey::new("p", "t"), OutputSource::Worker, request(), &cancel)
            .await;
        assert_eq!(outcome, PhaseOutcome::Cancelled);
        assert_eq!(runner.call_count(), 1);
    }
}
