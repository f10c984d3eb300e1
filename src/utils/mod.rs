//! Shared utility functions for kube-agent-bench.

pub mod text;

pub use text::{truncate, truncate_to};
