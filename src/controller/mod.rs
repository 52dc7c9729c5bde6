//! Loop controller
//!
//! `LoopController` runs one loop as an independent task; `LoopHandle` is
//! the registry's view onto it.

mod handle;
mod loop_controller;

pub use handle::{Control, LoopHandle};
pub use loop_controller::{ControllerDeps, LoopController, STOPPED_BY_USER};
