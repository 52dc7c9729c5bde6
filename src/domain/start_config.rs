//! Caller-supplied start configuration.

use serde::{Deserialize, Serialize};

use super::loop_state::LoopSettings;
use crate::config::LoopDefaults;
use crate::error::{RalphError, Result};

/// Parameters accepted by `start()`; omitted fields fall back to config defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartConfig {
    pub task_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer_model: Option<String>,
}

impl StartConfig {
    pub fn new(task_description: impl Into<String>) -> Self {
        Self {
            task_description: task_description.into(),
            ..Default::default()
        }
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    pub fn with_worker_model(mut self, model: impl Into<String>) -> Self {
        self.worker_model = Some(model.into());
        self
    }

    pub fn with_reviewer_model(mut self, model: impl Into<String>) -> Self {
        self.reviewer_model = Some(model.into());
        self
    }

    /// Validate and apply defaults.
    pub fn resolve(&self, defaults: &LoopDefaults) -> Result<LoopSettings> {
        if self.task_description.trim().is_empty() {
            return Err(RalphError::Validation("taskDescription must not be empty".into()));
        }

        let max_turns = self.max_turns.unwrap_or(defaults.max_turns);
        if max_turns == 0 {
            return Err(RalphError::Validation("maxTurns must be greater than 0".into()));
        }

        let worker_model = non_blank(self.worker_model.as_deref()).unwrap_or(&defaults.worker_model);
        let reviewer_model =
            non_blank(self.reviewer_model.as_deref()).unwrap_or(&defaults.reviewer_model);

        Ok(LoopSettings {
            task_description: self.task_description.clone(),
            max_turns,
            worker_model: worker_model.to_string(),
            reviewer_model: reviewer_model.to_string(),
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
