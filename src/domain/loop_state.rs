//! Loop state record and related types
//!
//! `LoopState` is the one persisted record per (projectId, taskId). Its JSON
//! shape uses camelCase field names so dashboards reading the state files see
//! `taskId`, `currentIteration`, `finalResult` and so on.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key identifying one loop: a task within a project
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    pub project_id: String,
    pub task_id: String,
}

impl TaskKey {
    pub fn new(project_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            task_id: task_id.into(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_id, self.task_id)
    }
}

/// Lifecycle status of a loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    /// Created, not yet started
    Idle,
    /// Worker agent call in flight
    WorkerRunning,
    /// Reviewer agent call in flight
    ReviewerRunning,
    /// Halted at a phase boundary, waiting for resume
    Paused,
    /// Ended through a reviewer decision or the turn limit
    Completed,
    /// Ended through an error, a critical failure or a stop request
    Failed,
}

impl LoopStatus {
    /// Returns true if the loop is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopStatus::Completed | LoopStatus::Failed)
    }

    /// Returns true while a phase call is in flight
    pub fn is_running(&self) -> bool {
        matches!(self, LoopStatus::WorkerRunning | LoopStatus::ReviewerRunning)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoopStatus::Idle => "idle",
            LoopStatus::WorkerRunning => "worker_running",
            LoopStatus::ReviewerRunning => "reviewer_running",
            LoopStatus::Paused => "paused",
            LoopStatus::Completed => "completed",
            LoopStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of a loop that ended through a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalResult {
    Approved,
    MaxTurnsReached,
    CriticalFailure,
}

impl fmt::Display for FinalResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FinalResult::Approved => "approved",
            FinalResult::MaxTurnsReached => "max_turns_reached",
            FinalResult::CriticalFailure => "critical_failure",
        };
        f.write_str(s)
    }
}

/// Reviewer verdict on one iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
    CriticalFailure,
}

impl fmt::Display for ReviewDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReviewDecision::Approve => "approve",
            ReviewDecision::Reject => "reject",
            ReviewDecision::CriticalFailure => "critical_failure",
        };
        f.write_str(s)
    }
}

/// What the worker produced in one iteration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerOutput {
    /// Free-text result returned by the worker agent
    pub result: String,
    /// Files the worker reported touching
    #[serde(default)]
    pub files_modified: Vec<String>,
}

/// One worker-then-reviewer cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Iteration {
    /// 1-based iteration number
    pub number: u32,
    pub worker_output: WorkerOutput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer_feedback: Option<String>,
    /// Absent until the reviewer phase for this iteration has returned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<ReviewDecision>,
    pub timestamp: DateTime<Utc>,
}

impl Iteration {
    /// Record a finished worker phase
    pub fn from_worker(number: u32, worker_output: WorkerOutput) -> Self {
        Self {
            number,
            worker_output,
            reviewer_feedback: None,
            decision: None,
            timestamp: Utc::now(),
        }
    }

    /// True once the reviewer has rendered a decision
    pub fn is_reviewed(&self) -> bool {
        self.decision.is_some()
    }
}

/// Persisted state of one loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopState {
    //=== Identity ===
    pub task_id: String,
    pub project_id: String,
    pub task_description: String,

    //=== Behavior Configuration ===
    pub max_turns: u32,
    pub worker_model: String,
    pub reviewer_model: String,

    //=== Runtime State ===
    pub status: LoopStatus,
    pub current_iteration: u32,
    #[serde(default)]
    pub iterations: Vec<Iteration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_result: Option<FinalResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    //=== Timestamps ===
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    /// Set on the live view when the last save failed; never persisted
    #[serde(skip)]
    pub persistence_warning: Option<String>,
}

impl LoopState {
    /// Create an idle loop from resolved settings
    pub fn new(project_id: &str, task_id: &str, settings: &LoopSettings) -> Self {
        Self {
            task_id: task_id.to_string(),
            project_id: project_id.to_string(),
            task_description: settings.task_description.clone(),
            max_turns: settings.max_turns,
            worker_model: settings.worker_model.clone(),
            reviewer_model: settings.reviewer_model.clone(),
            status: LoopStatus::Idle,
            current_iteration: 0,
            iterations: Vec::new(),
            final_result: None,
            error: None,
            start_time: None,
            end_time: None,
            persistence_warning: None,
        }
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::new(&self.project_id, &self.task_id)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn last_iteration(&self) -> Option<&Iteration> {
        self.iterations.last()
    }

    /// True when the newest iteration still waits for its reviewer phase
    pub fn awaiting_review(&self) -> bool {
        self.iterations.last().is_some_and(|it| !it.is_reviewed())
    }

    /// Iteration number the next worker phase will produce
    pub fn next_worker_iteration(&self) -> u32 {
        self.iterations.len() as u32 + 1
    }
}

/// Fully-resolved loop settings after defaults are applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSettings {
    pub task_description: String,
    pub max_turns: u32,
    pub worker_model: String,
    pub reviewer_model: String,
}
