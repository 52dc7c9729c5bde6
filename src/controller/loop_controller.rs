//! Loop state machine.
//!
//! One controller owns one loop. It alternates worker and reviewer phases,
//! samples pause/stop requests only at phase boundaries, and after every
//! transition persists the full state, publishes the live view, then emits
//! events, in that order.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::handle::{Control, LoopHandle};
use crate::domain::{FinalResult, Iteration, LoopEvent, LoopState, LoopStatus, ReviewDecision};
use crate::error::{RalphError, Result};
use crate::events::EventEmitter;
use crate::phase::{PhaseOutcome, ReviewerExecutor, WorkerExecutor};
use crate::storage::StateStore;

/// Error recorded on a loop that was stopped by its caller
pub const STOPPED_BY_USER: &str = "Stopped by user";

/// Collaborators shared by every controller
#[derive(Clone)]
pub struct ControllerDeps {
    pub store: Arc<dyn StateStore>,
    pub emitter: Arc<dyn EventEmitter>,
    pub worker: WorkerExecutor,
    pub reviewer: ReviewerExecutor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Worker,
    Reviewer,
}

pub struct LoopController {
    state: LoopState,
    deps: ControllerDeps,
    state_tx: watch::Sender<LoopState>,
    control_rx: watch::Receiver<Control>,
    cancel: CancellationToken,
}

impl LoopController {
    /// Create a controller for an idle loop, plus the handle used to steer it
    pub fn new(state: LoopState, deps: ControllerDeps) -> (Self, LoopHandle) {
        let key = state.key();
        let (state_tx, state_rx) = watch::channel(state.clone());
        let (control_tx, control_rx) = watch::channel(Control::Run);
        let cancel = CancellationToken::new();

        let controller = Self {
            state,
            deps,
            state_tx,
            control_rx,
            cancel: cancel.clone(),
        };
        let handle = LoopHandle::new(key, state_rx, control_tx, cancel);
        (controller, handle)
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    /// Transition `idle -> worker_running` and return the initial state.
    pub async fn start(&mut self) -> Result<LoopState> {
        if self.state.status != LoopStatus::Idle {
            return Err(RalphError::InvalidState(format!(
                "{} already started (status={})",
                self.state.key(),
                self.state.status
            )));
        }
        self.begin().await;
        Ok(self.state.clone())
    }

    async fn begin(&mut self) {
        self.state.start_time = Some(Utc::now());
        self.state.current_iteration = 1;
        self.state.status = LoopStatus::WorkerRunning;
        log::info!(
            "{} started (maxTurns={}, worker={}, reviewer={})",
            self.state.key(),
            self.state.max_turns,
            self.state.worker_model,
            self.state.reviewer_model
        );
        let events = vec![LoopEvent::status(&self.state)];
        self.commit(events).await;
    }

    /// Drive the loop until it reaches a terminal status.
    pub async fn run(mut self) -> LoopState {
        if self.state.status == LoopStatus::Idle {
            self.begin().await;
        }

        let mut phase = if self.state.awaiting_review() {
            Phase::Reviewer
        } else {
            Phase::Worker
        };

        loop {
            let next = match phase {
                Phase::Worker => self.run_worker().await,
                Phase::Reviewer => self.run_reviewer().await,
            };
            let Some(next) = next else { break };
            let Some(next) = self.cross_boundary(next).await else { break };
            phase = next;
        }

        log::info!(
            "{} finished: status={} finalResult={:?} iterations={}",
            self.state.key(),
            self.state.status,
            self.state.final_result,
            self.state.iterations.len()
        );
        self.state
    }

    /// Worker phase; returns the phase to run next, or `None` once terminal.
    async fn run_worker(&mut self) -> Option<Phase> {
        let outcome = self.deps.worker.execute(&self.state, &self.cancel).await;
        match outcome {
            PhaseOutcome::Completed(output) => {
                let iteration = Iteration::from_worker(self.state.current_iteration, output);
                log::info!(
                    "{} worker finished iteration {} ({} files modified)",
                    self.state.key(),
                    iteration.number,
                    iteration.worker_output.files_modified.len()
                );
                self.state.iterations.push(iteration.clone());
                let events = vec![
                    LoopEvent::worker_complete(&self.state, &iteration),
                    LoopEvent::iteration(&self.state, &iteration),
                ];
                self.commit(events).await;
                Some(Phase::Reviewer)
            }
            PhaseOutcome::Cancelled => {
                self.finish_stopped().await;
                None
            }
            PhaseOutcome::Failed(error) => {
                self.finish(LoopStatus::Failed, None, Some(error)).await;
                None
            }
        }
    }

    /// Reviewer phase; returns the phase to run next, or `None` once terminal.
    async fn run_reviewer(&mut self) -> Option<Phase> {
        let outcome = self.deps.reviewer.execute(&self.state, &self.cancel).await;
        let verdict = match outcome {
            PhaseOutcome::Completed(verdict) => verdict,
            PhaseOutcome::Cancelled => {
                self.finish_stopped().await;
                return None;
            }
            PhaseOutcome::Failed(error) => {
                self.finish(LoopStatus::Failed, Some(FinalResult::CriticalFailure), Some(error))
                    .await;
                return None;
            }
        };

        let Some(last) = self.state.iterations.last_mut() else {
            self.finish(
                LoopStatus::Failed,
                Some(FinalResult::CriticalFailure),
                Some("reviewer returned without a worker iteration".to_string()),
            )
            .await;
            return None;
        };
        last.decision = Some(verdict.decision);
        last.reviewer_feedback = Some(verdict.feedback.clone());
        let iteration = last.clone();

        log::info!(
            "{} reviewer decided {} on iteration {}",
            self.state.key(),
            verdict.decision,
            iteration.number
        );
        let events = vec![
            LoopEvent::reviewer_complete(&self.state, iteration.number, verdict.decision, &verdict.feedback),
            LoopEvent::iteration(&self.state, &iteration),
        ];
        self.commit(events).await;

        // A terminal decision wins over any pending pause or stop
        match verdict.decision {
            ReviewDecision::Approve => {
                self.finish(LoopStatus::Completed, Some(FinalResult::Approved), None).await;
                None
            }
            ReviewDecision::CriticalFailure => {
                let error = format!("Reviewer reported critical failure: {}", verdict.feedback);
                self.finish(LoopStatus::Failed, Some(FinalResult::CriticalFailure), Some(error))
                    .await;
                None
            }
            ReviewDecision::Reject if self.state.current_iteration >= self.state.max_turns => {
                self.finish(LoopStatus::Completed, Some(FinalResult::MaxTurnsReached), None)
                    .await;
                None
            }
            ReviewDecision::Reject => Some(Phase::Worker),
        }
    }

    /// Honor pause/stop between phases, then enter the next phase.
    async fn cross_boundary(&mut self, next: Phase) -> Option<Phase> {
        loop {
            let control = *self.control_rx.borrow_and_update();
            match control {
                Control::Run => {
                    // After a pause, the recorded history decides what runs next
                    let next = if self.state.status == LoopStatus::Paused {
                        self.resume_phase()
                    } else {
                        next
                    };
                    self.enter(next).await;
                    return Some(next);
                }
                Control::Stop => {
                    self.finish_stopped().await;
                    return None;
                }
                Control::Pause => {
                    if self.state.status != LoopStatus::Paused {
                        self.state.status = LoopStatus::Paused;
                        log::info!(
                            "{} paused after iteration {}",
                            self.state.key(),
                            self.state.iterations.len()
                        );
                        let events = vec![LoopEvent::status(&self.state)];
                        self.commit(events).await;
                    }
                    if self.control_rx.changed().await.is_err() {
                        log::warn!("{} lost its handle while paused; stopping", self.state.key());
                        self.finish_stopped().await;
                        return None;
                    }
                }
            }
        }
    }

    fn resume_phase(&self) -> Phase {
        if self.state.awaiting_review() {
            Phase::Reviewer
        } else {
            Phase::Worker
        }
    }

    /// Publish the status for the phase about to run.
    ///
    /// Entering a worker phase only bumps `current_iteration` and emits
    /// `status`; the iteration itself is appended, with an `iteration`
    /// event, once the worker completes. While a worker is in flight
    /// `current_iteration == iterations.len() + 1`.
    async fn enter(&mut self, phase: Phase) {
        match phase {
            Phase::Worker => {
                self.state.current_iteration = self.state.next_worker_iteration();
                self.state.status = LoopStatus::WorkerRunning;
            }
            Phase::Reviewer => {
                self.state.status = LoopStatus::ReviewerRunning;
            }
        }
        log::debug!(
            "{} -> {} (iteration {})",
            self.state.key(),
            self.state.status,
            self.state.current_iteration
        );
        let events = vec![LoopEvent::status(&self.state)];
        self.commit(events).await;
    }

    async fn finish_stopped(&mut self) {
        log::info!("{} stopped by caller", self.state.key());
        self.finish(LoopStatus::Failed, None, Some(STOPPED_BY_USER.to_string()))
            .await;
    }

    async fn finish(&mut self, status: LoopStatus, final_result: Option<FinalResult>, error: Option<String>) {
        self.state.status = status;
        self.state.final_result = final_result;
        self.state.error = error;
        self.state.end_time = Some(Utc::now());

        let mut events = Vec::new();
        if let Some(error) = &self.state.error {
            log::warn!("{} failed: {}", self.state.key(), error);
            events.push(LoopEvent::error(&self.state, error.clone()));
        }
        events.push(LoopEvent::status(&self.state));
        events.push(LoopEvent::complete(&self.state));
        self.commit(events).await;
    }

    /// Persist, publish the live view, then emit.
    ///
    /// A failed save does not stop the loop; it leaves a warning on the
    /// live view until the next successful save.
    async fn commit(&mut self, events: Vec<LoopEvent>) {
        match self.deps.store.save(&self.state).await {
            Ok(()) => {
                if self.state.persistence_warning.take().is_some() {
                    log::info!("{} persistence recovered", self.state.key());
                }
            }
            Err(e) => {
                log::error!("{} failed to persist state: {}", self.state.key(), e);
                self.state.persistence_warning = Some(format!("state not persisted: {}", e));
            }
        }

        self.state_tx.send_replace(self.state.clone());

        for event in events {
            self.deps.emitter.emit(event);
        }
    }
}
