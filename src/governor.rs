//! Shared limit on concurrent agent sessions.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// System-wide max-concurrent-agent-sessions limiter.
///
/// Cloning shares the same pool. Phase executors hold one permit per agent
/// call attempt and drop it when the attempt returns.
#[derive(Clone)]
pub struct SessionGovernor {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl SessionGovernor {
    pub fn new(max_sessions: usize) -> Self {
        let capacity = max_sessions.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a session slot; `None` if cancelled first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            permit = self.semaphore.clone().acquire_owned() => permit.ok(),
            _ = cancel.cancelled() => None,
        }
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_permits_are_shared_and_returned() {
        let governor = SessionGovernor::new(2);
        let other = governor.clone();
        let cancel = CancellationToken::new();

        let a = governor.acquire(&cancel).await.unwrap();
        let _b = other.acquire(&cancel).await.unwrap();
        assert_eq!(governor.available(), 0);

        drop(a);
        assert_eq!(other.available(), 1);
        assert_eq!(governor.capacity(), 2);
    }

    #[tokio::test]
    async fn test_acquire_cancelled_while_waiting() {
        let governor = SessionGovernor::new(1);
        let cancel = CancellationToken::new();
        let _held = governor.acquire(&cancel).await.unwrap();

        let waiter_cancel = CancellationToken::new();
        waiter_cancel.cancel();
        assert!(governor.acquire(&waiter_cancel).await.is_none());
    }

    #[test]
    fn test_zero_capacity_clamped() {
        assert_eq!(SessionGovernor::new(0).capacity(), 1);
    }
}
