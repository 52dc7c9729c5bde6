//! Storage layer for loop state
//!
//! - `FileStateStore`: one JSON file per task, replaced atomically
//! - `InMemoryStateStore`: map-backed store for tests and embedding

mod file;
mod memory;
mod traits;

pub use file::FileStateStore;
pub use memory::InMemoryStateStore;
pub use traits::{StateStore, sort_by_start_time};
