//! Task Registry
//!
//! In-memory directory of active loops; the entry point for every control
//! and read operation.

mod task_registry;

pub use task_registry::{INTERRUPTED_BY_RESTART, TaskRegistry};
