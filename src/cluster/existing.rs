//! Backend for a cluster that is already running.
//!
//! Nothing is created or deleted; the provider only locates the kubeconfig.

use std::path::PathBuf;

use async_trait::async_trait;

use super::{ClusterProvider, ProviderConfig};
use crate::error::ClusterError;

pub struct ExistingProvider {
    config: ProviderConfig,
}

impl ExistingProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }

    /// Configured kubeconfig, then `$KUBECONFIG`, then `~/.kube/config`.
    pub fn resolved_kubeconfig(&self) -> PathBuf {
        if let Some(path) = self.config.existing_kubeconfig.as_deref().filter(|p| !p.is_empty()) {
            return PathBuf::from(path);
        }
        if let Some(path) = std::env::var_os("KUBECONFIG").filter(|p| !p.is_empty()) {
            return PathBuf::from(path);
        }
        let home = std::env::var_os("HOME").unwrap_or_default();
        PathBuf::from(home).join(".kube").join("config")
    }
}

#[async_trait]
impl ClusterProvider for ExistingProvider {
    fn name(&self) -> &'static str {
        "existing"
    }

    async fn exists(&self, _name: &str) -> Result<bool, ClusterError> {
        match tokio::fs::metadata(self.resolved_kubeconfig()).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn create(&self, name: &str) -> Result<(), ClusterError> {
        if self.exists(name).await? {
            Ok(())
        } else {
            Err(ClusterError::KubeconfigNotFound(self.resolved_kubeconfig()))
        }
    }

    async fn delete(&self, _name: &str) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn kubeconfig(&self, _name: &str) -> Result<Vec<u8>, ClusterError> {
        Ok(tokio::fs::read(self.resolved_kubeconfig()).await?)
    }

    async fn kubeconfig_path(&self, _name: &str) -> Result<PathBuf, ClusterError> {
        Ok(self.resolved_kubeconfig())
    }
}
