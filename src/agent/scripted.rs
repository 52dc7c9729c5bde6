//! Deterministic agent runner driven by scripted steps.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::{AgentError, AgentRequest, AgentResponse, AgentRole, AgentRunner};
use crate::domain::ReviewDecision;

/// One scripted reply
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Respond(AgentResponse),
    Fail(AgentError),
}

/// Replays per-role scripts in order.
///
/// When a role's script runs dry the worker answers "attempted" and the
/// reviewer rejects. An optional gate holds every call in flight until
/// `release` is called, which lets callers observe a loop mid-phase.
pub struct ScriptedAgentRunner {
    scripts: Mutex<HashMap<AgentRole, VecDeque<ScriptStep>>>,
    calls: Mutex<Vec<AgentRequest>>,
    calls_tx: watch::Sender<usize>,
    gate: Option<Arc<Semaphore>>,
    honor_cancel: bool,
}

impl Default for ScriptedAgentRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedAgentRunner {
    pub fn new() -> Self {
        let (calls_tx, _) = watch::channel(0);
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            calls_tx,
            gate: None,
            honor_cancel: true,
        }
    }

    /// Hold each call until `release` lets it through
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// Behave like a runner that cannot be preempted mid-call
    pub fn ignoring_cancel(mut self) -> Self {
        self.honor_cancel = false;
        self
    }

    pub fn push(&self, role: AgentRole, step: ScriptStep) -> &Self {
        lock(&self.scripts).entry(role).or_default().push_back(step);
        self
    }

    pub fn worker_responds(&self, content: &str) -> &Self {
        self.push(AgentRole::Worker, ScriptStep::Respond(AgentResponse::text(content)))
    }

    pub fn worker_fails(&self, error: AgentError) -> &Self {
        self.push(AgentRole::Worker, ScriptStep::Fail(error))
    }

    /// Queue a well-formed reviewer verdict
    pub fn reviewer_decides(&self, decision: ReviewDecision, feedback: &str) -> &Self {
        let body = serde_json::json!({ "decision": decision, "feedback": feedback }).to_string();
        self.push(AgentRole::Reviewer, ScriptStep::Respond(AgentResponse::text(body)))
    }

    pub fn reviewer_responds(&self, raw: &str) -> &Self {
        self.push(AgentRole::Reviewer, ScriptStep::Respond(AgentResponse::text(raw)))
    }

    pub fn reviewer_fails(&self, error: AgentError) -> &Self {
        self.push(AgentRole::Reviewer, ScriptStep::Fail(error))
    }

    /// Let `n` gated calls proceed
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn calls(&self) -> Vec<AgentRequest> {
        lock(&self.calls).clone()
    }

    pub fn calls_for(&self, role: AgentRole) -> Vec<AgentRequest> {
        lock(&self.calls).iter().filter(|c| c.role == role).cloned().collect()
    }

    pub fn call_count(&self) -> usize {
        *self.calls_tx.borrow()
    }

    /// Resolve once at least `n` calls have started
    pub async fn wait_for_calls(&self, n: usize) {
        let mut rx = self.calls_tx.subscribe();
        let _ = rx.wait_for(|count| *count >= n).await;
    }

    fn next_step(&self, role: AgentRole) -> ScriptStep {
        let scripted = lock(&self.scripts).get_mut(&role).and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| match role {
            AgentRole::Worker => ScriptStep::Respond(AgentResponse::text("attempted")),
            AgentRole::Reviewer => ScriptStep::Respond(AgentResponse::text(
                r#"{"decision":"reject","feedback":"needs more work"}"#,
            )),
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl AgentRunner for ScriptedAgentRunner {
    async fn run(
        &self,
        request: AgentRequest,
        output: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<AgentResponse, AgentError> {
        let role = request.role;
        lock(&self.calls).push(request);
        self.calls_tx.send_modify(|count| *count += 1);

        if let Some(gate) = &self.gate {
            if self.honor_cancel {
                tokio::select! {
                    permit = gate.acquire() => {
                        if let Ok(permit) = permit {
                            permit.forget();
                        }
                    }
                    _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                }
            } else if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        if self.honor_cancel && cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        match self.next_step(role) {
            ScriptStep::Respond(response) => {
                let _ = output.send(response.content.clone()).await;
                Ok(response)
            }
            ScriptStep::Fail(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request(role: AgentRole) -> AgentRequest {
        AgentRequest {
            role,
            model: "m".to_string(),
            prompt: "p".to_string(),
        }
    }

    #[tokio::test]
    async fn test_replays_scripts_then_defaults() {
        let runner = ScriptedAgentRunner::new();
        runner.worker_responds("first").worker_fails(AgentError::Fatal("boom".into()));
        let (tx, mut rx) = mpsc::channel(8);

        let first = runner
            .run(request(AgentRole::Worker), tx.clone(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.content, "first");
        assert_eq!(rx.recv().await.unwrap(), "first");

        let second = runner
            .run(request(AgentRole::Worker), tx.clone(), CancellationToken::new())
            .await;
        assert_eq!(second, Err(AgentError::Fatal("boom".into())));

        let third = runner
            .run(request(AgentRole::Worker), tx.clone(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(third.content, "attempted");

        let review = runner
            .run(request(AgentRole::Reviewer), tx, CancellationToken::new())
            .await
            .unwrap();
        assert!(review.content.contains("reject"));

        assert_eq!(runner.call_count(), 4);
        assert_eq!(runner.calls_for(AgentRole::Worker).len(), 3);
    }

    #[tokio::test]
    async fn test_gate_holds_until_release() {
        let runner = Arc::new(ScriptedAgentRunner::new().gated());
        let (tx, _rx) = mpsc::channel(8);

        let task = {
            let runner = runner.clone();
            tokio::spawn(async move {
                runner
                    .run(request(AgentRole::Worker), tx, CancellationToken::new())
                    .await
            })
        };

        runner.wait_for_calls(1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        runner.release(1);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_gated_call_honors_cancel() {
        let runner = ScriptedAgentRunner::new().gated();
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = runner.run(request(AgentRole::Worker), tx, cancel).await;
        assert_eq!(result, Err(AgentError::Cancelled));
    }

    #[tokio::test]
    async fn test_ignoring_cancel_finishes_call() {
        let runner = ScriptedAgentRunner::new().ignoring_cancel();
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = runner.run(request(AgentRole::Worker), tx, cancel).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_reviewer_decides_emits_json() {
        let runner = ScriptedAgentRunner::new();
        runner.reviewer_decides(ReviewDecision::CriticalFailure, "unsafe change");
        let (tx, _rx) = mpsc::channel(8);

        let response = runner
            .run(request(AgentRole::Reviewer), tx, CancellationToken::new())
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&response.content).unwrap();
        assert_eq!(value["decision"], "critical_failure");
        assert_eq!(value["feedback"], "unsafe change");
    }
}
