//! Agent Runner collaborator
//!
//! An `AgentRunner` executes one prompt against an AI coding agent and
//! returns its free-form output. Streaming chunks go to the `output` sender
//! as they arrive; the `cancel` token asks the runner to abandon the call.

mod command;
mod scripted;

pub use command::{CommandAgentRunner, FILE_MODIFIED_MARKER};
pub use scripted::{ScriptStep, ScriptedAgentRunner};

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Which side of the loop a call is made for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Worker,
    Reviewer,
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentRole::Worker => f.write_str("worker"),
            AgentRole::Reviewer => f.write_str("reviewer"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRequest {
    pub role: AgentRole,
    pub model: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentResponse {
    /// Full text output of the call
    pub content: String,
    /// Files the agent reported touching
    pub files_modified: Vec<String>,
}

impl AgentResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            files_modified: Vec::new(),
        }
    }

    pub fn with_files(mut self, files: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.files_modified = files.into_iter().map(Into::into).collect();
        self
    }
}

/// Agent call failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("Agent call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Agent process exited with code {code:?}: {stderr}")]
    ProcessFailed { code: Option<i32>, stderr: String },

    #[error("Failed to launch agent: {0}")]
    Launch(String),

    #[error("Agent call cancelled")]
    Cancelled,

    #[error("Agent failed: {0}")]
    Fatal(String),
}

impl AgentError {
    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::Timeout(_) => true,
            AgentError::Connection(_) => true,
            AgentError::RateLimited(_) => true,
            AgentError::ProcessFailed { .. } => false,
            AgentError::Launch(_) => false,
            AgentError::Cancelled => false,
            AgentError::Fatal(_) => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AgentError::Cancelled)
    }
}

#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Execute one agent call.
    ///
    /// Implementations should return `AgentError::Cancelled` promptly once
    /// `cancel` fires. Runners that cannot preempt may finish the call.
    async fn run(
        &self,
        request: AgentRequest,
        output: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<AgentResponse, AgentError>;
}
