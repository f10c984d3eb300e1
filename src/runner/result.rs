//! Evaluation results, agent traces and run summaries.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::LlmConfig;
use crate::task::{Difficulty, Task};

/// Outcome of one task evaluated against one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskResult {
    /// Agent finished, every expectation held and the verifier passed.
    Success,
    /// Expectations or verifier rejected the agent's work.
    Fail,
    /// Infrastructure, setup or agent error.
    Error,
    /// The task deadline elapsed during the agent stage.
    Timeout,
    /// Not evaluated.
    Skipped,
    /// Any other value found in a stored result.
    #[serde(other)]
    Unknown,
}

impl TaskResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskResult::Success => "success",
            TaskResult::Fail => "fail",
            TaskResult::Error => "error",
            TaskResult::Timeout => "timeout",
            TaskResult::Skipped => "skipped",
            TaskResult::Unknown => "unknown",
        }
    }

    /// Error and timeout outcomes are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskResult::Error | TaskResult::Timeout)
    }
}

impl std::fmt::Display for TaskResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single expectation or verifier failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    #[serde(rename = "type")]
    pub failure_type: String,
    #[serde(default)]
    pub expected: String,
    #[serde(default)]
    pub actual: String,
    #[serde(default)]
    pub message: String,
}

impl Failure {
    pub fn new(failure_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            failure_type: failure_type.into(),
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = expected.into();
        self
    }

    pub fn with_actual(mut self, actual: impl Into<String>) -> Self {
        self.actual = actual.into();
        self
    }
}

/// One step of an agent run: a prompt, a tool call, or a model response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceStep {
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub step_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_args: String,
    #[serde(rename = "toolOut", default, skip_serializing_if = "String::is_empty")]
    pub tool_output: String,
    /// RFC 3339 timestamp.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
}

impl TraceStep {
    fn stamped(step_type: &str) -> Self {
        Self {
            step_type: step_type.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            ..Self::default()
        }
    }

    pub fn prompt(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::stamped("prompt")
        }
    }

    pub fn response(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::stamped("response")
        }
    }

    pub fn tool_call(
        name: impl Into<String>,
        args: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: name.into(),
            tool_args: args.into(),
            tool_output: output.into(),
            ..Self::stamped("tool_call")
        }
    }

    pub fn is_tool_call(&self) -> bool {
        self.step_type == "tool_call"
    }
}

/// Recorded steps of an in-process agent run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTrace {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<TraceStep>,
    #[serde(default)]
    pub total_steps: usize,
    #[serde(default)]
    pub tool_calls: usize,
}

impl AgentTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step and keeps the counters in sync.
    pub fn add_step(&mut self, step: TraceStep) {
        if step.is_tool_call() {
            self.tool_calls += 1;
        }
        self.steps.push(step);
        self.total_steps = self.steps.len();
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Result of evaluating one task with one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalResult {
    pub task_id: String,
    #[serde(default)]
    pub task_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub task_category: String,
    #[serde(default)]
    pub difficulty: Difficulty,

    pub llm_config: LlmConfig,

    pub result: TaskResult,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<Failure>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,

    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub duration: Duration,

    /// Agent output.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub setup_log: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub verify_log: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cleanup_log: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub trace_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<AgentTrace>,

    /// 1-based attempt number.
    #[serde(default)]
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub run_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kubeconfig: String,
}

impl EvalResult {
    /// Starts a result for `task` × `llm`. The outcome is `error` until the
    /// pipeline decides otherwise.
    pub fn new(task: &Task, llm: &LlmConfig, run_id: impl Into<String>, attempt: u32) -> Self {
        let now = Utc::now();
        Self {
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            task_category: task.category.clone(),
            difficulty: task.difficulty,
            llm_config: llm.clone(),
            result: TaskResult::Error,
            failures: Vec::new(),
            error: String::new(),
            start_time: now,
            end_time: now,
            duration: Duration::ZERO,
            output: String::new(),
            setup_log: String::new(),
            verify_log: String::new(),
            cleanup_log: String::new(),
            trace_path: String::new(),
            log_path: String::new(),
            trace: None,
            attempt,
            run_id: run_id.into(),
            kubeconfig: String::new(),
        }
    }

    /// Sets the outcome and stamps end time and duration.
    pub fn finish(&mut self, result: TaskResult) {
        self.result = result;
        self.end_time = Utc::now();
        self.duration = (self.end_time - self.start_time).to_std().unwrap_or_default();
    }

    /// Finishes with `result` and an error message.
    pub fn finish_with_error(&mut self, result: TaskResult, error: impl Into<String>) {
        self.error = error.into();
        self.finish(result);
    }

    pub fn is_success(&self) -> bool {
        self.result == TaskResult::Success
    }

    /// The error, or the first failure message, or nothing.
    pub fn note(&self) -> &str {
        if !self.error.is_empty() {
            &self.error
        } else {
            self.failures.first().map(|f| f.message.as_str()).unwrap_or_default()
        }
    }
}

/// Aggregate of a whole run or of a set of loaded results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkSummary {
    #[serde(default)]
    pub run_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub duration: Duration,

    pub total_tasks: usize,
    pub success_count: usize,
    pub fail_count: usize,
    /// Errors and timeouts.
    pub error_count: usize,
    pub skipped_count: usize,

    pub easy_success: usize,
    pub easy_total: usize,
    pub medium_success: usize,
    pub medium_total: usize,
    pub hard_success: usize,
    pub hard_total: usize,

    /// Keyed by LLM id.
    #[serde(default)]
    pub llm_results: BTreeMap<String, LlmSummary>,

    /// Percentage of pairings whose single attempt succeeded.
    pub pass_at_1: f64,
}

impl BenchmarkSummary {
    /// A zeroed summary.
    pub fn empty() -> Self {
        let now = Utc::now();
        Self {
            run_id: String::new(),
            start_time: now,
            end_time: now,
            duration: Duration::ZERO,
            total_tasks: 0,
            success_count: 0,
            fail_count: 0,
            error_count: 0,
            skipped_count: 0,
            easy_success: 0,
            easy_total: 0,
            medium_success: 0,
            medium_total: 0,
            hard_success: 0,
            hard_total: 0,
            llm_results: BTreeMap::new(),
            pass_at_1: 0.0,
        }
    }

    /// `(successes, total)` for a difficulty.
    pub fn difficulty_counts(&self, difficulty: Difficulty) -> (usize, usize) {
        match difficulty {
            Difficulty::Easy => (self.easy_success, self.easy_total),
            Difficulty::Medium => (self.medium_success, self.medium_total),
            Difficulty::Hard => (self.hard_success, self.hard_total),
        }
    }
}

/// Per-model aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmSummary {
    pub llm_config: LlmConfig,
    pub total_tasks: usize,
    pub success_count: usize,
    pub fail_count: usize,
    /// Everything that is neither success nor fail.
    pub error_count: usize,
    /// Percentage of successes.
    pub pass_rate: f64,
    pub avg_duration: Duration,
}

impl LlmSummary {
    pub fn new(llm_config: LlmConfig) -> Self {
        Self {
            llm_config,
            total_tasks: 0,
            success_count: 0,
            fail_count: 0,
            error_count: 0,
            pass_rate: 0.0,
            avg_duration: Duration::ZERO,
        }
    }
}
