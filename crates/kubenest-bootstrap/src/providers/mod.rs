//! Collaborator contracts consumed by the bootstrap executor.
//!
//! The executor is generic over these traits; the shell-out implementations
//! in this module are the production path, while tests substitute scripted
//! fakes. All methods return `Send` futures so the worker task can be
//! spawned onto the runtime.

mod charts;
mod cluster;
mod operators;
mod process;

pub use charts::HelmInstaller;
pub use cluster::KindCluster;
pub use operators::KubectlProviders;
pub(crate) use process::{run_capture, run_streaming, run_with_stdin};

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;

use anyhow::Result;

use kubenest_core::{ChartSpec, Config, PodSummary};

/// Callback for structured progress lines from long-running collaborator
/// calls. Implementations must be cheap and non-blocking.
pub type ProgressFn<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Lifecycle of the container-hosted cluster itself.
pub trait ClusterLifecycle: Send + Sync {
    fn exists(&self, name: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Create the cluster, reporting step descriptions as it runs.
    fn create(&self, config: &Config, progress: ProgressFn<'_>)
        -> impl Future<Output = Result<()>> + Send;

    fn delete(&self, name: &str) -> impl Future<Output = Result<()>> + Send;

    /// Snapshot of control-plane pods, for the readiness poll.
    fn control_plane_pods(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Vec<PodSummary>>> + Send;

    /// Stand up the cluster-local image registry and attach it to the
    /// cluster network.
    fn setup_registry(
        &self,
        name: &str,
        port: u16,
        progress: ProgressFn<'_>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Install extra CA certificates into the cluster nodes.
    fn trust_cas(
        &self,
        name: &str,
        certs: &[PathBuf],
        progress: ProgressFn<'_>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Pre-load container images into the cluster nodes.
    fn load_images(
        &self,
        name: &str,
        images: &[String],
        progress: ProgressFn<'_>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Apply custom-resource manifests; returns the number applied.
    fn apply_manifests(
        &self,
        paths: &[PathBuf],
        progress: ProgressFn<'_>,
    ) -> impl Future<Output = Result<usize>> + Send;
}

/// Options for one chart install.
pub struct ChartInstallOptions<'a> {
    /// Hook merging run-level value overrides into the chart's values
    /// before install.
    pub values_transform:
        Option<&'a (dyn Fn(BTreeMap<String, String>) -> BTreeMap<String, String> + Send + Sync)>,
    /// Receives a summary of the merged install parameters plus streamed
    /// installer output.
    pub log: ProgressFn<'a>,
}

/// Chart-style package installer.
pub trait ChartInstaller: Send + Sync {
    fn install(
        &self,
        spec: &ChartSpec,
        options: ChartInstallOptions<'_>,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Health entry for one installed provider.
#[derive(Clone, Debug)]
pub struct ProviderStatus {
    pub name: String,
    pub package: String,
    pub healthy: bool,
    pub condition: String,
    pub reason: Option<String>,
    pub message: Option<String>,
}

/// Dependency/operator (provider) installer.
pub trait ProviderInstaller: Send + Sync {
    fn install(
        &self,
        name: &str,
        package: &str,
        progress: ProgressFn<'_>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// One entry per installed provider with a health flag.
    fn status(&self) -> impl Future<Output = Result<Vec<ProviderStatus>>> + Send;
}
