//! Domain types for ralph-loop
//!
//! - LoopState: the persisted per-task record with its iterations
//! - StartConfig: caller-supplied parameters for a new loop
//! - LoopEvent: notifications pushed to observers

pub mod event;
pub mod loop_state;
pub mod start_config;

pub use event::{LoopEvent, OutputSource, ReviewerFeedback, WorkerSummary};
pub use loop_state::{
    FinalResult, Iteration, LoopSettings, LoopState, LoopStatus, ReviewDecision, TaskKey, WorkerOutput,
};
pub use start_config::StartConfig;
