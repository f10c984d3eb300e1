//! vcluster backend: virtual clusters hosted in namespace `vcluster-<name>`.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use super::command::{self, args, write_private};
use super::{ClusterProvider, ProviderConfig};
use crate::error::ClusterError;

const READY_TIMEOUT: Duration = Duration::from_secs(300);
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Virtual clusters managed by the `vcluster` CLI.
pub struct VClusterProvider {
    config: ProviderConfig,
}

impl VClusterProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }

    fn host_namespace(name: &str) -> String {
        format!("vcluster-{}", name)
    }

    fn kubeconfig_file(&self, name: &str) -> PathBuf {
        self.config
            .work_dir()
            .join(format!("kubeconfig-vcluster-{}.yaml", name))
    }

    fn host_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if let Some(ctx) = self.config.vcluster_context.as_deref() {
            flags.push("--context".to_string());
            flags.push(ctx.to_string());
        }
        if let Some(kc) = self.config.vcluster_kubeconfig.as_deref() {
            flags.push("--kubeconfig".to_string());
            flags.push(kc.to_string());
        }
        flags
    }

    /// Appends the host flags, as the vcluster CLI expects them.
    fn with_host_flags(&self, mut a: Vec<String>) -> Vec<String> {
        a.extend(self.host_flags());
        a
    }

    /// Prefixes kubectl args with the host flags.
    fn kubectl_args(&self, rest: Vec<String>) -> Vec<String> {
        let mut a = self.host_flags();
        a.extend(rest);
        a
    }

    async fn wait_for_vcluster(&self, name: &str, namespace: &str) -> Result<(), ClusterError> {
        let deadline = Instant::now() + READY_TIMEOUT;
        let selector = format!("app=vcluster,release={}", name);
        let query = self.kubectl_args(args([
            "get",
            "pods",
            "-n",
            namespace,
            "-l",
            selector.as_str(),
            "-o",
            "jsonpath={.items[0].status.phase}",
        ]));

        while Instant::now() < deadline {
            if let Ok(out) = command::run("kubectl", &query).await {
                if out.trim() == "Running" {
                    return Ok(());
                }
            }
            sleep(POLL_INTERVAL).await;
        }

        Err(ClusterError::NotReady {
            name: name.to_string(),
            reason: "timeout waiting for vcluster to be ready".to_string(),
        })
    }
}

#[async_trait]
impl ClusterProvider for VClusterProvider {
    fn name(&self) -> &'static str {
        "vcluster"
    }

    async fn exists(&self, name: &str) -> Result<bool, ClusterError> {
        let list = self.with_host_flags(args(["list", "--output", "json"]));
        match command::run("vcluster", &list).await {
            Ok(out) => Ok(vcluster_listed(&out, name)),
            Err(e) => {
                // A failing list means nothing to reuse.
                debug!(error = %e, "vcluster list failed");
                Ok(false)
            }
        }
    }

    async fn create(&self, name: &str) -> Result<(), ClusterError> {
        let namespace = Self::host_namespace(name);
        info!(cluster = name, namespace = %namespace, "Creating vcluster");

        let create_ns = self.kubectl_args(args(["create", "namespace", namespace.as_str()]));
        if let Err(e) = command::run("kubectl", &create_ns).await {
            if !e.to_string().contains("AlreadyExists") {
                return Err(e);
            }
        }

        let create = self.with_host_flags(args([
            "create",
            name,
            "--namespace",
            namespace.as_str(),
            "--connect=false",
        ]));
        command::run("vcluster", &create).await?;

        self.wait_for_vcluster(name, &namespace).await
    }

    async fn delete(&self, name: &str) -> Result<(), ClusterError> {
        let namespace = Self::host_namespace(name);
        let delete = self.with_host_flags(args(["delete", name, "--namespace", namespace.as_str()]));
        command::run("vcluster", &delete).await?;

        let delete_ns = self.kubectl_args(args([
            "delete",
            "namespace",
            namespace.as_str(),
            "--ignore-not-found",
        ]));
        if let Err(e) = command::run("kubectl", &delete_ns).await {
            debug!(error = %e, namespace = %namespace, "Failed to delete vcluster host namespace");
        }
        Ok(())
    }

    async fn kubeconfig(&self, name: &str) -> Result<Vec<u8>, ClusterError> {
        let namespace = Self::host_namespace(name);
        let path = self.kubeconfig_file(name);
        let path_str = path.to_string_lossy().into_owned();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let connect = self.with_host_flags(args([
            "connect",
            name,
            "--namespace",
            namespace.as_str(),
            "--kube-config-context-name",
            name,
            "--update-current=false",
            "--kube-config",
            path_str.as_str(),
        ]));
        command::run("vcluster", &connect).await?;

        let kubeconfig = tokio::fs::read(&path).await?;
        let _ = tokio::fs::remove_file(&path).await;
        Ok(kubeconfig)
    }

    async fn kubeconfig_path(&self, name: &str) -> Result<PathBuf, ClusterError> {
        let kubeconfig = self.kubeconfig(name).await?;
        let path = self.kubeconfig_file(name);
        write_private(&path, &kubeconfig).await?;
        Ok(path)
    }
}

/// Checks `vcluster list --output json` for a cluster called `name`.
fn vcluster_listed(output: &str, name: &str) -> bool {
    match serde_json::from_str::<Vec<serde_json::Value>>(output) {
        Ok(items) => items
            .iter()
            .filter_map(|item| item.get("Name").or_else(|| item.get("name")))
            .any(|n| n.as_str() == Some(name)),
        Err(_) => output.contains(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vcluster_listed_json() {
        let out = r#"[{"Name":"bench-a","Namespace":"vcluster-bench-a","Status":"Running"}]"#;
        assert!(vcluster_listed(out, "bench-a"));
        assert!(!vcluster_listed(out, "bench"));
        assert!(!vcluster_listed("[]", "bench-a"));
    }

    #[test]
    fn test_vcluster_listed_fallback() {
        assert!(vcluster_listed("NAME bench-a Running", "bench-a"));
    }

    #[test]
    fn test_host_flags() {
        let provider = VClusterProvider::new(
            ProviderConfig::new()
                .with_vcluster_context("host-ctx")
                .with_vcluster_kubeconfig("/host/kubeconfig"),
        );
        assert_eq!(
            provider.with_host_flags(args(["list"])),
            args(["list", "--context", "host-ctx", "--kubeconfig", "/host/kubeconfig"])
        );
        assert_eq!(
            provider.kubectl_args(args(["get", "pods"])),
            args(["--context", "host-ctx", "--kubeconfig", "/host/kubeconfig", "get", "pods"])
        );
    }

    #[test]
    fn test_names() {
        assert_eq!(VClusterProvider::host_namespace("x"), "vcluster-x");
        let provider = VClusterProvider::new(ProviderConfig::new().with_work_dir("/out"));
        assert_eq!(
            provider.kubeconfig_file("x"),
            PathBuf::from("/out/kubeconfig-vcluster-x.yaml")
        );
    }
}
