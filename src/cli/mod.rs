//! Command-line interface for delay-scheduler.
//!
//! Provides commands for running the expiry listener, scheduling and removing
//! events by hand, consuming a job queue, and checking configuration.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands};
