//! Error types for kube-agent-bench operations.
//!
//! One enum per subsystem:
//! - Task loading and filtering
//! - Cluster provisioning
//! - Benchmark run orchestration
//! - Result analysis and report rendering
//! - LLM API interactions

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading or filtering tasks.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("failed to read task directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load task {dir}: {reason}")]
    Task { dir: String, reason: String },

    #[error("invalid task pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

impl LoaderError {
    pub(crate) fn task(dir: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        LoaderError::Task {
            dir: dir.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors that can occur during cluster provisioning.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("unknown cluster provider: {0}")]
    UnknownProvider(String),

    #[error("{command} failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("cluster '{0}' does not exist and creation policy forbids creating it")]
    NotFound(String),

    #[error("cluster '{name}' not ready: {reason}")]
    NotReady { name: String, reason: String },

    #[error("kubeconfig not found at {}", .0.display())]
    KubeconfigNotFound(PathBuf),

    #[error("namespace {namespace}: {message}")]
    Namespace { namespace: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClusterError {
    pub(crate) fn namespace(namespace: impl Into<String>, message: impl std::fmt::Display) -> Self {
        ClusterError::Namespace {
            namespace: namespace.into(),
            message: message.to_string(),
        }
    }
}

/// Errors that abort a whole benchmark run.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("task directory not accessible: {0}")]
    TaskDirNotAccessible(String),

    #[error("no tasks found matching criteria")]
    NoTasks,

    #[error("failed to create output directory {}: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load tasks: {0}")]
    Loader(#[from] LoaderError),

    #[error("failed to setup cluster: {0}")]
    Cluster(#[from] ClusterError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors that can occur while analyzing results or writing reports.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("unsupported output format: {0}")]
    UnknownFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("no endpoint configured for provider '{0}'")]
    MissingEndpoint(String),

    #[error("HTTP client error: {0}")]
    Client(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("LLM returned no choices")]
    EmptyResponse,
}
