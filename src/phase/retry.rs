//! Retry policy for transient agent failures.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per phase call, including the first
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-based).
    ///
    /// Doubles from `initial_backoff_ms`, capped at `max_backoff_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let cap = self.max_backoff_ms.max(self.initial_backoff_ms);
        let shift = attempt.saturating_sub(1).min(20);
        let factor = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(factor).min(cap))
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Sleep for the backoff; returns true if cancelled first.
    pub async fn wait(&self, attempt: u32, cancel: &CancellationToken) -> bool {
        let delay = self.backoff(attempt);
        tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }
}
