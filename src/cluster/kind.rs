//! kind backend.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use super::command::{self, args, write_private};
use super::{ClusterProvider, ProviderConfig};
use crate::error::ClusterError;

const CREATE_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(5);
const READY_TIMEOUT: Duration = Duration::from_secs(120);
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Local clusters managed by the `kind` CLI.
pub struct KindProvider {
    config: ProviderConfig,
}

impl KindProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }

    fn create_args(&self, name: &str) -> Vec<String> {
        let mut a = args(["create", "cluster", "--name", name, "--wait", "5m"]);
        if let Some(image) = self.config.kind_image.as_deref() {
            a.push("--image".to_string());
            a.push(image.to_string());
        }
        a
    }

    fn kubeconfig_file(&self, name: &str) -> PathBuf {
        self.config.work_dir().join(format!("kubeconfig-{}.yaml", name))
    }

    /// Polls node readiness until every node reports Ready or the wait expires.
    async fn wait_for_cluster(&self, name: &str) -> Result<(), ClusterError> {
        let path = self.kubeconfig_path(name).await?;
        let deadline = Instant::now() + READY_TIMEOUT;
        let kubeconfig = path.to_string_lossy().into_owned();
        let query = args([
            "--kubeconfig",
            kubeconfig.as_str(),
            "get",
            "nodes",
            "-o",
            "jsonpath={.items[*].status.conditions[?(@.type=='Ready')].status}",
        ]);

        let mut ready = false;
        while Instant::now() < deadline {
            if let Ok(out) = command::run("kubectl", &query).await {
                if out.contains("True") {
                    ready = true;
                    break;
                }
            }
            sleep(POLL_INTERVAL).await;
        }

        let _ = tokio::fs::remove_file(&path).await;
        if ready {
            Ok(())
        } else {
            Err(ClusterError::NotReady {
                name: name.to_string(),
                reason: "timeout waiting for cluster nodes to be ready".to_string(),
            })
        }
    }
}

/// Returns true when `name` is one of the lines of `kind get clusters`.
fn cluster_listed(output: &str, name: &str) -> bool {
    output.lines().any(|line| line.trim() == name)
}

#[async_trait]
impl ClusterProvider for KindProvider {
    fn name(&self) -> &'static str {
        "kind"
    }

    async fn exists(&self, name: &str) -> Result<bool, ClusterError> {
        let out = command::run("kind", &args(["get", "clusters"])).await?;
        Ok(cluster_listed(&out, name))
    }

    async fn create(&self, name: &str) -> Result<(), ClusterError> {
        let mut last_err = None;
        for attempt in 1..=CREATE_ATTEMPTS {
            if attempt > 1 {
                sleep(RETRY_DELAY).await;
            }
            info!(cluster = name, attempt, "Creating kind cluster");
            match command::run("kind", &self.create_args(name)).await {
                Ok(_) => {
                    last_err = None;
                    break;
                }
                Err(e) => {
                    warn!(cluster = name, attempt, error = %e, "kind create failed");
                    let _ = self.delete(name).await;
                    last_err = Some(e);
                }
            }
        }
        if let Some(e) = last_err {
            return Err(e);
        }

        self.wait_for_cluster(name).await
    }

    async fn delete(&self, name: &str) -> Result<(), ClusterError> {
        command::run("kind", &args(["delete", "cluster", "--name", name])).await?;
        Ok(())
    }

    async fn kubeconfig(&self, name: &str) -> Result<Vec<u8>, ClusterError> {
        let out = command::run("kind", &args(["get", "kubeconfig", "--name", name])).await?;
        Ok(out.into_bytes())
    }

    async fn kubeconfig_path(&self, name: &str) -> Result<PathBuf, ClusterError> {
        let kubeconfig = self.kubeconfig(name).await?;
        let path = self.kubeconfig_file(name);
        write_private(&path, &kubeconfig).await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_listed() {
        let out = "bench-1\nkube-bench-abc\n";
        assert!(cluster_listed(out, "kube-bench-abc"));
        assert!(!cluster_listed(out, "kube-bench"));
        assert!(!cluster_listed("", "x"));
    }

    #[test]
    fn test_create_args() {
        let provider = KindProvider::new(ProviderConfig::new());
        assert_eq!(
            provider.create_args("c1"),
            args(["create", "cluster", "--name", "c1", "--wait", "5m"])
        );

        let provider = KindProvider::new(ProviderConfig::new().with_kind_image("kindest/node:v1.30.0"));
        let a = provider.create_args("c1");
        assert_eq!(&a[6..], &["--image".to_string(), "kindest/node:v1.30.0".to_string()]);
    }

    #[test]
    fn test_kubeconfig_file_in_work_dir() {
        let provider = KindProvider::new(ProviderConfig::new().with_work_dir("/out"));
        assert_eq!(provider.kubeconfig_file("c1"), PathBuf::from("/out/kubeconfig-c1.yaml"));
    }
}
