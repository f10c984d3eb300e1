//! Benchmark runner.
//!
//! Evaluates every selected task against every configured model:
//!
//! ```text
//! Task × LLM → namespace → setup → agent → expectations → verifier → cleanup
//! ```
//!
//! Pairings run concurrently up to the configured parallelism and each
//! result is written to the output directory as soon as it completes.
//!
//! # Example
//!
//! ```ignore
//! use kube_agent_bench::runner::{LlmConfig, RunConfig, Runner};
//!
//! let config = RunConfig::new("./tasks")
//!     .with_llm(LlmConfig::new("openai", "gpt-4o"))
//!     .with_parallelism(4);
//!
//! let runner = Runner::new(config)?;
//! let summary = runner.run().await?;
//! println!("Pass@1: {:.1}%", summary.pass_at_1);
//! ```

pub mod agents;
pub mod config;
pub mod executor;
pub mod expectations;
pub mod result;
pub mod script;

pub use agents::{create_adapter, AgentAdapter, AgentError, AgentOutput, AgentRequest};
pub use config::{split_and_trim, ClusterPolicy, LlmConfig, RunConfig};
pub use executor::{build_log_content, progress_line, report_path, CancelHandle, Runner};
pub use expectations::check_expectations;
pub use result::{
    AgentTrace, BenchmarkSummary, EvalResult, Failure, LlmSummary, TaskResult, TraceStep,
};
pub use script::{
    namespace_name, run_script, KubectlNamespaceManager, NamespaceManager, ScriptOutput,
};
