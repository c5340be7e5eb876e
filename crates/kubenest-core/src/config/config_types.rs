//! Configuration types and defaults for kubenest.
//!
//! Keeps schema definitions in one place for easier auditing.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Top-level configuration loaded from config.toml.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub cluster: ClusterConfig,
    pub registry: RegistryConfig,
    pub control_plane: ControlPlaneConfig,
    pub charts: Vec<ChartSpec>,
    pub providers: Vec<ProviderSpec>,
    /// Custom-resource manifests applied after providers are healthy.
    pub resources: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub name: String,
    /// Node image for the container-hosted cluster.
    pub node_image: Option<String>,
    /// CA certificate files to trust inside the cluster nodes.
    pub trusted_ca: Vec<PathBuf>,
    /// Images loaded into the cluster nodes before any installs run.
    pub preload_images: Vec<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: "kubenest".to_string(),
            node_image: None,
            trusted_ca: Vec::new(),
            preload_images: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 5001,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    pub enabled: bool,
    pub namespace: String,
    /// Chart reference for the control-plane operator.
    pub chart: String,
    pub version: Option<String>,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "kubenest-system".to_string(),
            chart: "oci://ghcr.io/kubenest/charts/control-plane".to_string(),
            version: None,
        }
    }
}

/// Named point in the fixed stage order where configured charts install.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub enum Checkpoint {
    #[serde(rename = "pre-control-plane")]
    PreControlPlane,
    #[serde(rename = "post-control-plane")]
    PostControlPlane,
    #[serde(rename = "post-dependency-install")]
    PostDependencyInstall,
    #[serde(rename = "final")]
    Final,
}

impl Checkpoint {
    pub const ALL: [Checkpoint; 4] = [
        Checkpoint::PreControlPlane,
        Checkpoint::PostControlPlane,
        Checkpoint::PostDependencyInstall,
        Checkpoint::Final,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Checkpoint::PreControlPlane => "pre-control-plane",
            Checkpoint::PostControlPlane => "post-control-plane",
            Checkpoint::PostDependencyInstall => "post-dependency-install",
            Checkpoint::Final => "final",
        }
    }

    /// Parse a checkpoint name, accepting the retired `post-eso` spelling as
    /// a compatibility alias for `final`.
    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "pre-control-plane" => Ok(Checkpoint::PreControlPlane),
            "post-control-plane" => Ok(Checkpoint::PostControlPlane),
            "post-dependency-install" => Ok(Checkpoint::PostDependencyInstall),
            "final" => Ok(Checkpoint::Final),
            "post-eso" => {
                warn!("checkpoint name \"post-eso\" is deprecated; use \"final\"");
                Ok(Checkpoint::Final)
            }
            other => Err(format!("unknown checkpoint name: {other}")),
        }
    }
}

impl<'de> Deserialize<'de> for Checkpoint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Checkpoint::parse(&value).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChartSpec {
    pub name: String,
    /// Chart repository URL, or empty for OCI references in `chart`.
    #[serde(default)]
    pub repo: Option<String>,
    pub chart: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default = "default_chart_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub values: BTreeMap<String, String>,
    #[serde(default = "default_checkpoint")]
    pub checkpoint: Checkpoint,
}

fn default_chart_namespace() -> String {
    "default".to_string()
}

fn default_checkpoint() -> Checkpoint {
    Checkpoint::Final
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderSpec {
    pub name: String,
    /// Package reference, e.g. `ghcr.io/kubenest/provider-dns:v0.3.0`.
    pub package: String,
}

impl Config {
    /// Charts configured for one checkpoint, in declaration order.
    pub fn charts_at(&self, checkpoint: Checkpoint) -> Vec<&ChartSpec> {
        self.charts
            .iter()
            .filter(|chart| chart.checkpoint == checkpoint)
            .collect()
    }
}
