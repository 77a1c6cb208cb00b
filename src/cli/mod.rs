//! Command-line interface for insight-worker.
//!
//! Provides the long-running `worker` command plus operator commands for
//! enqueueing jobs, inspecting the queue and job records, and clearing the
//! response cache.

mod commands;

pub use commands::{parse_cli, run, run_with_cli};
