//! Task scripts and namespace isolation.
//!
//! Setup, verifier and cleanup scripts run under `bash` from the task
//! directory with `KUBECONFIG` and `NAMESPACE` exported. Each evaluation
//! gets its own namespace, created and deleted through a
//! [`NamespaceManager`].

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::ClusterError;

/// Outcome of a script run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOutput {
    /// Exit status rendered as text, `None` on a zero exit.
    pub error: Option<String>,
    /// Stdout, followed by `\nSTDERR:\n` and stderr when stderr is non-empty.
    pub log: String,
}

impl ScriptOutput {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs `bash <script>` in `work_dir`.
///
/// A missing script or a spawn failure is reported through `error` like a
/// non-zero exit, so callers treat every failure the same way.
pub async fn run_script(
    script: &Path,
    work_dir: &Path,
    kubeconfig: &str,
    namespace: &str,
) -> ScriptOutput {
    if !script.exists() {
        return ScriptOutput {
            error: Some(format!("script not found: {}", script.display())),
            log: String::new(),
        };
    }

    debug!(script = %script.display(), namespace = %namespace, "Running task script");

    let result = Command::new("bash")
        .arg(script)
        .current_dir(work_dir)
        .env("KUBECONFIG", kubeconfig)
        .env("NAMESPACE", namespace)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await;

    match result {
        Ok(output) => {
            let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
            if !output.stderr.is_empty() {
                log.push_str("\nSTDERR:\n");
                log.push_str(&String::from_utf8_lossy(&output.stderr));
            }
            let error = (!output.status.success()).then(|| output.status.to_string());
            ScriptOutput { error, log }
        }
        Err(e) => ScriptOutput {
            error: Some(format!("failed to run {}: {}", script.display(), e)),
            log: String::new(),
        },
    }
}

/// Creates and deletes per-evaluation namespaces.
#[async_trait]
pub trait NamespaceManager: Send + Sync {
    async fn create(&self, kubeconfig: &str, namespace: &str) -> Result<(), ClusterError>;

    /// Best-effort; callers log the error and carry on.
    async fn delete(&self, kubeconfig: &str, namespace: &str) -> Result<(), ClusterError>;
}

/// Shells out to `kubectl`.
#[derive(Debug, Clone, Default)]
pub struct KubectlNamespaceManager;

impl KubectlNamespaceManager {
    async fn kubectl(namespace: &str, action: &str, args: &[&str]) -> Result<(), ClusterError> {
        let output = Command::new("kubectl")
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ClusterError::namespace(namespace, format!("failed to run kubectl: {}", e)))?;

        if output.status.success() {
            return Ok(());
        }
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Err(ClusterError::namespace(
            namespace,
            format!("kubectl {} namespace failed: {}, output: {}", action, output.status, combined.trim()),
        ))
    }
}

#[async_trait]
impl NamespaceManager for KubectlNamespaceManager {
    async fn create(&self, kubeconfig: &str, namespace: &str) -> Result<(), ClusterError> {
        Self::kubectl(
            namespace,
            "create",
            &["--kubeconfig", kubeconfig, "create", "namespace", namespace],
        )
        .await
    }

    async fn delete(&self, kubeconfig: &str, namespace: &str) -> Result<(), ClusterError> {
        Self::kubectl(
            namespace,
            "delete",
            &[
                "--kubeconfig",
                kubeconfig,
                "delete",
                "namespace",
                namespace,
                "--ignore-not-found",
                "--wait=false",
            ],
        )
        .await
    }
}

/// Name of the namespace isolating one task within a run.
pub fn namespace_name(task_id: &str, run_id: &str) -> String {
    format!("bench-{}-{}", task_id, run_id)
}
