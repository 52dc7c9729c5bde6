//! CLI module for ralph-loop - command-line interface and subcommands.
//!
//! Provides subcommands to run a loop in the foreground and to inspect,
//! delete and recover persisted loops.

pub mod commands;
pub mod render;

pub use commands::{Cli, Commands};
