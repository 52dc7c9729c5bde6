//! Global configuration.
//!
//! Loaded from ~/.config/ralph-loop/ralph-loop.yml or .ralph-loop.yml

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Global configuration for ralph-loop.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Defaults applied when `start()` omits a field.
    #[serde(rename = "loop")]
    pub loop_defaults: LoopDefaults,

    /// Retry policy for transient agent failures.
    pub retry: RetryConfig,

    /// Concurrency limits.
    pub concurrency: ConcurrencyConfig,

    /// Storage settings.
    pub storage: StorageConfig,

    /// Agent CLI invocation.
    pub agent: AgentConfig,

    /// Event channel settings.
    pub events: EventsConfig,
}

impl Config {
    /// Load configuration with fallback chain.
    ///
    /// Search order:
    /// 1. Explicit path if provided
    /// 2. .ralph-loop.yml in current directory
    /// 3. ~/.config/ralph-loop/ralph-loop.yml
    /// 4. Defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_config = PathBuf::from(".ralph-loop.yml");
        if project_config.exists() {
            match Self::load_from_file(&project_config) {
                Ok(config) => {
                    log::info!("Loaded config from .ralph-loop.yml");
                    return Ok(config);
                }
                Err(e) => {
                    log::warn!("Failed to load .ralph-loop.yml: {}", e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("ralph-loop").join("ralph-loop.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", user_config.display());
                        return Ok(config);
                    }
                    Err(e) => {
                        log::warn!("Failed to load {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.loop_defaults.max_turns == 0 {
            eyre::bail!("loop.max-turns must be > 0");
        }
        if self.retry.max_attempts == 0 {
            eyre::bail!("retry.max-attempts must be > 0");
        }
        if self.concurrency.max_agent_sessions == 0 {
            eyre::bail!("concurrency.max-agent-sessions must be > 0");
        }
        if self.events.channel_capacity == 0 {
            eyre::bail!("events.channel-capacity must be > 0");
        }
        if self.agent.program.trim().is_empty() {
            eyre::bail!("agent.program must not be empty");
        }
        Ok(())
    }
}

/// Per-loop defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoopDefaults {
    /// Iteration cap when `start()` omits maxTurns.
    #[serde(rename = "max-turns")]
    pub max_turns: u32,

    #[serde(rename = "worker-model")]
    pub worker_model: String,

    #[serde(rename = "reviewer-model")]
    pub reviewer_model: String,
}

impl Default for LoopDefaults {
    fn default() -> Self {
        Self {
            max_turns: 5,
            worker_model: crate::config::DEFAULT_WORKER_MODEL.to_string(),
            reviewer_model: crate::config::DEFAULT_REVIEWER_MODEL.to_string(),
        }
    }
}

/// Retry policy for transient agent failures.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per phase call, including the first.
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    #[serde(rename = "initial-backoff-ms")]
    pub initial_backoff_ms: u64,

    #[serde(rename = "max-backoff-ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }
}

/// Concurrency limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Agent sessions allowed in flight across all loops.
    #[serde(rename = "max-agent-sessions")]
    pub max_agent_sessions: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self { max_agent_sessions: 4 }
    }
}

/// Storage settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for per-task state files.
    #[serde(rename = "state-dir")]
    pub state_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let default_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ralph-loop")
            .join("state");

        Self { state_dir: default_dir }
    }
}

/// Agent CLI invocation.
///
/// `{model}` and `{role}` in `args` are replaced per call.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentConfig {
    pub program: String,

    pub args: Vec<String>,

    /// Working directory for the agent process; inherits ours when unset.
    #[serde(rename = "working-dir")]
    pub working_dir: Option<PathBuf>,

    /// Timeout per agent call in milliseconds.
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: vec!["-p".to_string(), "--model".to_string(), "{model}".to_string()],
            working_dir: None,
            timeout_ms: 1_800_000, // 30 minutes
        }
    }
}

/// Event channel settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    #[serde(rename = "channel-capacity")]
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { channel_capacity: 1024 }
    }
}
