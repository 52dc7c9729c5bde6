//! External handle onto a running loop.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::domain::{LoopState, LoopStatus, TaskKey};
use crate::error::{RalphError, Result};

/// Control request sampled by the controller at phase boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Run,
    Pause,
    Stop,
}

/// Cloneable handle held by the registry: reads the live view and sends
/// pause, resume and stop requests.
#[derive(Clone)]
pub struct LoopHandle {
    key: TaskKey,
    state_rx: watch::Receiver<LoopState>,
    control_tx: Arc<watch::Sender<Control>>,
    cancel: CancellationToken,
}

impl LoopHandle {
    pub(super) fn new(
        key: TaskKey,
        state_rx: watch::Receiver<LoopState>,
        control_tx: watch::Sender<Control>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            key,
            state_rx,
            control_tx: Arc::new(control_tx),
            cancel,
        }
    }

    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    /// Latest in-memory view of the loop
    pub fn snapshot(&self) -> LoopState {
        self.state_rx.borrow().clone()
    }

    /// Receiver that observes every published view
    pub fn watch(&self) -> watch::Receiver<LoopState> {
        self.state_rx.clone()
    }

    pub fn status(&self) -> LoopStatus {
        self.state_rx.borrow().status
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Pending control request
    pub fn control(&self) -> Control {
        *self.control_tx.borrow()
    }

    /// Ask the loop to pause at the next phase boundary.
    pub fn pause(&self) -> Result<()> {
        let status = self.ensure_live("pause")?;
        match self.control() {
            Control::Stop => Err(RalphError::InvalidState(format!("{} is stopping", self.key))),
            Control::Pause => Err(RalphError::InvalidState(format!("{} is already paused", self.key))),
            Control::Run if status == LoopStatus::Paused => {
                Err(RalphError::InvalidState(format!("{} is already paused", self.key)))
            }
            Control::Run => {
                self.control_tx.send_replace(Control::Pause);
                log::info!("{} pause requested (status={})", self.key, status);
                Ok(())
            }
        }
    }

    /// Resume a paused loop, or withdraw a pause that has not taken effect yet.
    pub fn resume(&self) -> Result<()> {
        let status = self.ensure_live("resume")?;
        match self.control() {
            Control::Stop => Err(RalphError::InvalidState(format!("{} is stopping", self.key))),
            Control::Pause => {
                self.control_tx.send_replace(Control::Run);
                log::info!("{} resume requested (status={})", self.key, status);
                Ok(())
            }
            Control::Run => Err(RalphError::InvalidState(format!("{} is not paused", self.key))),
        }
    }

    /// Stop the loop, cancelling any in-flight agent call.
    pub fn stop(&self) -> Result<()> {
        let status = self.ensure_live("stop")?;
        if self.control() != Control::Stop {
            self.control_tx.send_replace(Control::Stop);
            log::info!("{} stop requested (status={})", self.key, status);
        }
        self.cancel.cancel();
        Ok(())
    }

    /// Resolve once the loop reaches a terminal status.
    pub async fn wait(&self) -> LoopState {
        let mut rx = self.state_rx.clone();
        let waited = rx.wait_for(|state| state.is_terminal()).await.map(|state| state.clone());
        match waited {
            Ok(state) => state,
            // Controller gone; the last published view is final
            Err(_) => rx.borrow().clone(),
        }
    }

    fn ensure_live(&self, action: &str) -> Result<LoopStatus> {
        let status = self.status();
        if status.is_terminal() {
            return Err(RalphError::InvalidState(format!(
                "cannot {} {}: loop already {}",
                action, self.key, status
            )));
        }
        Ok(status)
    }
}
