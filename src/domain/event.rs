//! Loop events pushed to observers.
//!
//! Serialized with a `type` tag in snake_case and camelCase fields, e.g.
//! `{"type":"worker_complete","projectId":"p","taskId":"t","summary":{...}}`.

use serde::{Deserialize, Serialize};

use super::loop_state::{FinalResult, Iteration, LoopState, LoopStatus, ReviewDecision, TaskKey};

/// Which agent produced an output chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputSource {
    Worker,
    Reviewer,
}

/// Summary attached to `worker_complete`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSummary {
    pub iteration_number: u32,
    pub files_modified: Vec<String>,
}

/// Feedback attached to `reviewer_complete`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewerFeedback {
    pub iteration_number: u32,
    pub decision: ReviewDecision,
    pub feedback: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum LoopEvent {
    Status {
        project_id: String,
        task_id: String,
        status: LoopStatus,
    },
    Iteration {
        project_id: String,
        task_id: String,
        iteration: Iteration,
    },
    Output {
        project_id: String,
        task_id: String,
        source: OutputSource,
        content: String,
    },
    WorkerComplete {
        project_id: String,
        task_id: String,
        summary: WorkerSummary,
    },
    ReviewerComplete {
        project_id: String,
        task_id: String,
        feedback: ReviewerFeedback,
    },
    Complete {
        project_id: String,
        task_id: String,
        final_status: LoopStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        final_result: Option<FinalResult>,
    },
    Error {
        project_id: String,
        task_id: String,
        error: String,
    },
}

impl LoopEvent {
    /// Status event reflecting the state's current status
    pub fn status(state: &LoopState) -> Self {
        LoopEvent::Status {
            project_id: state.project_id.clone(),
            task_id: state.task_id.clone(),
            status: state.status,
        }
    }

    pub fn iteration(state: &LoopState, iteration: &Iteration) -> Self {
        LoopEvent::Iteration {
            project_id: state.project_id.clone(),
            task_id: state.task_id.clone(),
            iteration: iteration.clone(),
        }
    }

    pub fn output(key: &TaskKey, source: OutputSource, content: String) -> Self {
        LoopEvent::Output {
            project_id: key.project_id.clone(),
            task_id: key.task_id.clone(),
            source,
            content,
        }
    }

    pub fn worker_complete(state: &LoopState, iteration: &Iteration) -> Self {
        LoopEvent::WorkerComplete {
            project_id: state.project_id.clone(),
            task_id: state.task_id.clone(),
            summary: WorkerSummary {
                iteration_number: iteration.number,
                files_modified: iteration.worker_output.files_modified.clone(),
            },
        }
    }

    pub fn reviewer_complete(
        state: &LoopState,
        iteration_number: u32,
        decision: ReviewDecision,
        feedback: &str,
    ) -> Self {
        LoopEvent::ReviewerComplete {
            project_id: state.project_id.clone(),
            task_id: state.task_id.clone(),
            feedback: ReviewerFeedback {
                iteration_number,
                decision,
                feedback: feedback.to_string(),
            },
        }
    }

    /// Terminal event carrying the final status and result
    pub fn complete(state: &LoopState) -> Self {
        LoopEvent::Complete {
            project_id: state.project_id.clone(),
            task_id: state.task_id.clone(),
            final_status: state.status,
            final_result: state.final_result,
        }
    }

    pub fn error(state: &LoopState, error: impl Into<String>) -> Self {
        LoopEvent::Error {
            project_id: state.project_id.clone(),
            task_id: state.task_id.clone(),
            error: error.into(),
        }
    }

    /// The loop this event belongs to
    pub fn task_key(&self) -> TaskKey {
        let (project_id, task_id) = match self {
            LoopEvent::Status { project_id, task_id, .. }
            | LoopEvent::Iteration { project_id, task_id, .. }
            | LoopEvent::Output { project_id, task_id, .. }
            | LoopEvent::WorkerComplete { project_id, task_id, .. }
            | LoopEvent::ReviewerComplete { project_id, task_id, .. }
            | LoopEvent::Complete { project_id, task_id, .. }
            | LoopEvent::Error { project_id, task_id, .. } => (project_id, task_id),
        };
        TaskKey::new(project_id.as_str(), task_id.as_str())
    }

    /// Wire name of the event type
    pub fn event_type(&self) -> &'static str {
        match self {
            LoopEvent::Status { .. } => "status",
            LoopEvent::Iteration { .. } => "iteration",
            LoopEvent::Output { .. } => "output",
            LoopEvent::WorkerComplete { .. } => "worker_complete",
            LoopEvent::ReviewerComplete { .. } => "reviewer_complete",
            LoopEvent::Complete { .. } => "complete",
            LoopEvent::Error { .. } => "error",
        }
    }
}
