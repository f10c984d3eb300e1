//! kube-agent-bench: benchmark harness for AI agents operating Kubernetes.
//!
//! Loads task definitions, runs every task against every configured model in
//! its own namespace, verifies the outcome and aggregates the results into
//! reports.

pub mod cli;
pub mod cluster;
pub mod error;
pub mod llm;
pub mod report;
pub mod runner;
pub mod task;
pub mod utils;

// Re-export commonly used error types
pub use error::{ClusterError, LlmError, LoaderError, ReportError, RunnerError};
