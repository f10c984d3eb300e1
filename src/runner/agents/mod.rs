//! Agent adapters.
//!
//! An adapter drives one agent through a task's prompts against the
//! cluster. Two adapters exist:
//!
//! - [`ExternalAgent`] runs a binary, piping the prompts to its stdin
//! - [`BuiltinAgent`] talks to an OpenAI-compatible endpoint in-process,
//!   optionally letting the model call `kubectl` and `bash`
//!
//! Output is written into a caller-owned [`AgentOutput`] as it arrives, so
//! whatever the agent produced survives a deadline cutting the run short.

pub mod builtin;
pub mod external;

use std::sync::Arc;

use async_trait::async_trait;

use super::config::{LlmConfig, RunConfig};
use super::result::{AgentTrace, TraceStep};
use crate::error::LlmError;
use crate::task::Task;

pub use builtin::{ApprovalCallback, BuiltinAgent};
pub use external::ExternalAgent;

/// What an agent is asked to do.
#[derive(Debug, Clone, Copy)]
pub struct AgentRequest<'a> {
    pub task: &'a Task,
    pub llm: &'a LlmConfig,
    pub kubeconfig: &'a str,
    pub namespace: &'a str,
}

/// Output collected while an agent runs.
#[derive(Debug, Default)]
pub struct AgentOutput {
    buf: Vec<u8>,
    trace: Option<AgentTrace>,
}

impl AgentOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_str(&mut self, text: &str) {
        self.buf.extend_from_slice(text.as_bytes());
    }

    /// Appends raw process output. Chunks may split UTF-8 sequences; they
    /// are decoded together in [`AgentOutput::text`].
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Everything collected so far, lossily decoded.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Records a trace step, starting the trace on first use.
    pub fn record(&mut self, step: TraceStep) {
        self.trace.get_or_insert_with(AgentTrace::new).add_step(step);
    }

    pub fn trace(&self) -> Option<&AgentTrace> {
        self.trace.as_ref()
    }

    pub fn take_trace(&mut self) -> Option<AgentTrace> {
        self.trace.take()
    }
}

/// Drives an agent through a task.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Runs the agent, appending everything it says to `output`.
    async fn run(
        &self,
        request: AgentRequest<'_>,
        output: &mut AgentOutput,
    ) -> Result<(), AgentError>;
}

/// Error type for agent operations.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("failed to start agent {bin}: {source}")]
    Spawn {
        bin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("agent exited with error: {status}, stderr: {stderr}")]
    Exited { status: String, stderr: String },

    #[error("AI request failed: {0}")]
    Llm(#[from] LlmError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Picks the adapter for a run: the external binary when one is
/// configured, the built-in agent otherwise.
pub fn create_adapter(config: &RunConfig) -> Arc<dyn AgentAdapter> {
    match &config.agent_bin {
        Some(bin) => Arc::new(ExternalAgent::from_config(bin.clone(), config)),
        None => Arc::new(BuiltinAgent::from_config(config)),
    }
}
