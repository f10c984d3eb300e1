//! Cluster provisioning backends.
//!
//! A [`ClusterProvider`] answers "does cluster X exist", creates and deletes
//! it, and hands out a kubeconfig for it. Three backends are provided:
//!
//! - [`KindProvider`]: local kind clusters (`kind` CLI)
//! - [`VClusterProvider`]: virtual clusters inside a host cluster (`vcluster` CLI)
//! - [`ExistingProvider`]: an already running cluster reached through a kubeconfig
//!
//! The runner resolves the cluster once per run according to its
//! [`ClusterPolicy`](crate::runner::ClusterPolicy).

mod command;
pub mod existing;
pub mod kind;
pub mod vcluster;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClusterError;

pub use existing::ExistingProvider;
pub use kind::KindProvider;
pub use vcluster::VClusterProvider;

/// Trait for cluster provisioning backends.
#[async_trait]
pub trait ClusterProvider: Send + Sync {
    /// Returns the backend name.
    fn name(&self) -> &'static str;

    /// Checks whether a cluster with the given name exists.
    async fn exists(&self, name: &str) -> Result<bool, ClusterError>;

    /// Creates a cluster with the given name.
    async fn create(&self, name: &str) -> Result<(), ClusterError>;

    /// Deletes the cluster with the given name.
    async fn delete(&self, name: &str) -> Result<(), ClusterError>;

    /// Returns the raw kubeconfig for the cluster.
    async fn kubeconfig(&self, name: &str) -> Result<Vec<u8>, ClusterError>;

    /// Returns a path to a kubeconfig file for the cluster.
    async fn kubeconfig_path(&self, name: &str) -> Result<PathBuf, ClusterError>;
}

/// Supported cluster backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Kind,
    #[serde(rename = "vcluster")]
    VCluster,
    #[default]
    Existing,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Kind => "kind",
            ProviderKind::VCluster => "vcluster",
            ProviderKind::Existing => "existing",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kind" => Ok(ProviderKind::Kind),
            "vcluster" => Ok(ProviderKind::VCluster),
            "" | "existing" => Ok(ProviderKind::Existing),
            other => Err(ClusterError::UnknownProvider(other.to_string())),
        }
    }
}

/// Backend settings. Each backend reads only the fields it cares about.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    /// Node image for kind clusters.
    pub kind_image: Option<String>,
    /// Host kube context for vcluster.
    pub vcluster_context: Option<String>,
    /// Host kubeconfig for vcluster.
    pub vcluster_kubeconfig: Option<String>,
    /// Kubeconfig of an existing cluster.
    pub existing_kubeconfig: Option<String>,
    /// Directory where generated kubeconfigs are written. Defaults to the temp dir.
    pub work_dir: Option<PathBuf>,
}

impl ProviderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind_image(mut self, image: impl Into<String>) -> Self {
        self.kind_image = Some(image.into());
        self
    }

    pub fn with_vcluster_context(mut self, context: impl Into<String>) -> Self {
        self.vcluster_context = Some(context.into());
        self
    }

    pub fn with_vcluster_kubeconfig(mut self, kubeconfig: impl Into<String>) -> Self {
        self.vcluster_kubeconfig = Some(kubeconfig.into());
        self
    }

    pub fn with_existing_kubeconfig(mut self, kubeconfig: impl Into<String>) -> Self {
        self.existing_kubeconfig = Some(kubeconfig.into());
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Directory for generated kubeconfig files.
    pub(crate) fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Creates a provider for the given backend.
pub fn create_provider(kind: ProviderKind, config: ProviderConfig) -> Arc<dyn ClusterProvider> {
    match kind {
        ProviderKind::Kind => Arc::new(KindProvider::new(config)),
        ProviderKind::VCluster => Arc::new(VClusterProvider::new(config)),
        ProviderKind::Existing => Arc::new(ExistingProvider::new(config)),
    }
}
