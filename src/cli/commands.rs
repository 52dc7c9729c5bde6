//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: start a loop and follow it to completion
//! - list: list a project's loops
//! - show: print one loop with its iterations
//! - delete: remove a finished loop's record
//! - recover: finalize loops left unfinished by a crashed process

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ralph-loop - a self-correcting worker/reviewer task loop
#[derive(Parser, Debug)]
#[command(name = "ralph-loop")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output (streams agent output)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a loop and follow it until it finishes (Ctrl-C stops it)
    Run {
        /// Project the loop belongs to
        project_id: String,

        /// Task description handed to the worker
        task: String,

        /// Maximum worker/reviewer iterations
        #[arg(short, long)]
        max_turns: Option<u32>,

        /// Model for the worker agent
        #[arg(long)]
        worker_model: Option<String>,

        /// Model for the reviewer agent
        #[arg(long)]
        reviewer_model: Option<String>,
    },

    /// List a project's loops, oldest first
    List {
        project_id: String,
    },

    /// Show one loop with its iteration history
    Show {
        project_id: String,
        task_id: String,
    },

    /// Delete a finished loop's record
    Delete {
        project_id: String,
        task_id: String,
    },

    /// Mark loops left unfinished by a crashed process as failed
    Recover,
}
