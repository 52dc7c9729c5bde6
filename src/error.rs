//! Error types for ralph-loop
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

use crate::agent::AgentError;

/// All error types that can occur in ralph-loop
#[derive(Debug, Error)]
pub enum RalphError {
    /// Bad start configuration or malformed identifier
    #[error("Validation error: {0}")]
    Validation(String),

    /// An active loop already exists for the project
    #[error("Concurrency conflict: project {project_id} already has active task {task_id}")]
    ConcurrencyConflict { project_id: String, task_id: String },

    /// Task not found in the registry or the state store
    #[error("Task not found: {0}")]
    NotFound(String),

    /// Operation not allowed in the loop's current lifecycle stage
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// State store write or read failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Agent runner failure that escaped the phase executors
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for ralph-loop operations
pub type Result<T> = std::result::Result<T, RalphError>;
