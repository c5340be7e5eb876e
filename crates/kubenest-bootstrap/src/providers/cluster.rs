//! Container-hosted cluster lifecycle via the `kind` and `docker` CLIs.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::process::Command;

use kubenest_core::{Config, PodSummary};

use super::{run_capture, run_streaming, ClusterLifecycle, ProgressFn};

/// Cluster provider backed by kind (Kubernetes-in-Docker).
pub struct KindCluster {
    kind_bin: String,
    docker_bin: String,
    kubectl_bin: String,
}

impl KindCluster {
    pub fn new() -> Self {
        Self {
            kind_bin: "kind".to_string(),
            docker_bin: "docker".to_string(),
            kubectl_bin: "kubectl".to_string(),
        }
    }

    fn kubectl(&self, cluster: &str) -> Command {
        let mut command = Command::new(&self.kubectl_bin);
        command.arg("--context").arg(format!("kind-{cluster}"));
        command
    }

    fn node_name(cluster: &str) -> String {
        format!("{cluster}-control-plane")
    }
}

impl Default for KindCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterLifecycle for KindCluster {
    async fn exists(&self, name: &str) -> Result<bool> {
        let mut command = Command::new(&self.kind_bin);
        command.args(["get", "clusters"]);
        let output = run_capture("kind get clusters", command).await?;
        Ok(output.lines().any(|line| line.trim() == name))
    }

    async fn create(&self, config: &Config, progress: ProgressFn<'_>) -> Result<()> {
        progress(&format!("creating cluster {}", config.cluster.name));
        let mut command = Command::new(&self.kind_bin);
        command.args(["create", "cluster", "--name", &config.cluster.name, "--wait", "60s"]);
        if let Some(image) = &config.cluster.node_image {
            command.args(["--image", image]);
        }
        run_streaming("kind create cluster", command, progress).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let mut command = Command::new(&self.kind_bin);
        command.args(["delete", "cluster", "--name", name]);
        run_capture("kind delete cluster", command).await.map(|_| ())
    }

    async fn control_plane_pods(&self, name: &str) -> Result<Vec<PodSummary>> {
        let mut command = self.kubectl(name);
        command.args(["get", "pods", "-n", "kube-system", "-o", "json"]);
        let output = run_capture("kubectl get pods", command).await?;
        let parsed: Value =
            serde_json::from_str(&output).context("parse kubectl pod list")?;
        Ok(parse_pod_summaries(&parsed))
    }

    async fn setup_registry(
        &self,
        name: &str,
        port: u16,
        progress: ProgressFn<'_>,
    ) -> Result<()> {
        let registry = format!("{name}-registry");

        progress(&format!("starting registry container {registry} on port {port}"));
        let mut run = Command::new(&self.docker_bin);
        run.args([
            "run",
            "-d",
            "--restart=always",
            "-p",
            &format!("127.0.0.1:{port}:5000"),
            "--name",
            &registry,
            "registry:2",
        ]);
        run_streaming("docker run registry", run, progress).await?;

        progress("connecting registry to the cluster network");
        let mut connect = Command::new(&self.docker_bin);
        connect.args(["network", "connect", "kind", &registry]);
        run_streaming("docker network connect", connect, progress).await
    }

    async fn trust_cas(
        &self,
        name: &str,
        certs: &[PathBuf],
        progress: ProgressFn<'_>,
    ) -> Result<()> {
        let node = Self::node_name(name);
        for cert in certs {
            let file_name = cert
                .file_name()
                .map(|file| file.to_string_lossy().into_owned())
                .unwrap_or_else(|| "extra-ca.crt".to_string());
            progress(&format!("installing CA certificate {file_name}"));
            let mut copy = Command::new(&self.docker_bin);
            copy.arg("cp").arg(cert).arg(format!(
                "{node}:/usr/local/share/ca-certificates/{file_name}"
            ));
            run_streaming("docker cp ca", copy, progress).await?;
        }

        progress("refreshing node certificate store");
        let mut refresh = Command::new(&self.docker_bin);
        refresh.args(["exec", &node, "update-ca-certificates"]);
        run_streaming("update-ca-certificates", refresh, progress).await
    }

    async fn load_images(
        &self,
        name: &str,
        images: &[String],
        progress: ProgressFn<'_>,
    ) -> Result<()> {
        for image in images {
            progress(&format!("loading image {image}"));
            let mut load = Command::new(&self.kind_bin);
            load.args(["load", "docker-image", image, "--name", name]);
            run_streaming("kind load docker-image", load, progress).await?;
        }
        Ok(())
    }

    async fn apply_manifests(
        &self,
        paths: &[PathBuf],
        progress: ProgressFn<'_>,
    ) -> Result<usize> {
        // Applying runs against the current kind context set at create time.
        for path in paths {
            progress(&format!("applying {}", path.display()));
            let mut apply = Command::new(&self.kubectl_bin);
            apply.arg("apply").arg("-f").arg(path);
            run_streaming("kubectl apply", apply, progress).await?;
        }
        Ok(paths.len())
    }
}

fn parse_pod_summaries(parsed: &Value) -> Vec<PodSummary> {
    let Some(items) = parsed["items"].as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .map(|item| {
            let statuses = item["status"]["containerStatuses"]
                .as_array()
                .cloned()
                .unwrap_or_default();
            let ready = statuses
                .iter()
                .filter(|status| status["ready"].as_bool().unwrap_or(false))
                .count() as u32;
            PodSummary {
                name: item["metadata"]["name"].as_str().unwrap_or("").to_string(),
                namespace: item["metadata"]["namespace"]
                    .as_str()
                    .unwrap_or("")
                    .to_string(),
                phase: item["status"]["phase"].as_str().unwrap_or("Unknown").to_string(),
                ready_containers: ready,
                total_containers: statuses.len() as u32,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pod_summaries_from_kubectl_json() {
        let json: Value = serde_json::from_str(
            r#"{
                "items": [{
                    "metadata": {"name": "etcd-kubenest-control-plane", "namespace": "kube-system"},
                    "status": {
                        "phase": "Running",
                        "containerStatuses": [{"ready": true}, {"ready": false}]
                    }
                }]
            }"#,
        )
        .unwrap();
        let pods = parse_pod_summaries(&json);
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].name, "etcd-kubenest-control-plane");
        assert_eq!(pods[0].ready_containers, 1);
        assert_eq!(pods[0].total_containers, 2);
        assert!(!pods[0].is_ready());
    }

    #[test]
    fn missing_items_produce_an_empty_snapshot() {
        let json: Value = serde_json::from_str(r#"{"kind": "List"}"#).unwrap();
        assert!(parse_pod_summaries(&json).is_empty());
    }
}
