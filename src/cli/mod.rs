//! Command-line interface for hack-judge.
//!
//! Provides the `evaluate`, `costs` and `check-rubric` commands.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
