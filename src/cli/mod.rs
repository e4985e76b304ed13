//! Command-line interface for docker-step.
//!
//! Loads an execution plan, connects to the Docker daemon, and runs the step.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands, RunArgs};
