//! Configuration system for ralph-loop.
//!
//! A single YAML file supplies loop defaults, retry policy, concurrency
//! limits, storage location, agent invocation and event channel sizing.

use eyre::Result;
use std::path::PathBuf;

pub use self::global::{
    AgentConfig, ConcurrencyConfig, Config, EventsConfig, LoopDefaults, RetryConfig, StorageConfig,
};

mod global;

/// Default model for the Worker agent.
pub const DEFAULT_WORKER_MODEL: &str = "claude-sonnet-4-20250514";

/// Default model for the Reviewer agent.
pub const DEFAULT_REVIEWER_MODEL: &str = "claude-opus-4-20250514";

/// Load and validate configuration from the standard search paths.
pub fn load_config(explicit_path: Option<&PathBuf>) -> Result<Config> {
    let config = Config::load(explicit_path)?;
    config.validate()?;
    Ok(config)
}
