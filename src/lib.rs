//! ralph-loop - a self-correcting worker/reviewer task loop
//!
//! A Worker agent attempts a coding task, a Reviewer agent critiques the
//! attempt, and the cycle repeats until the Reviewer approves, the turn
//! limit is reached, or an unrecoverable failure occurs.

pub mod agent;
pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod events;
pub mod governor;
pub mod id;
pub mod phase;
pub mod registry;
pub mod storage;

pub use error::{RalphError, Result};
pub use registry::TaskRegistry;
