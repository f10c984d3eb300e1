//! Command-line interface for kube-agent-bench.
//!
//! Provides the `run`, `analyze` and `list` commands.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
