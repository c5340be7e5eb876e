//! Provider (dependency/operator) installs via `kubectl` against the
//! control plane's package API.

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::process::Command;

use super::{run_capture, run_with_stdin, ProgressFn, ProviderInstaller, ProviderStatus};

pub struct KubectlProviders {
    kubectl_bin: String,
    kube_context: String,
}

impl KubectlProviders {
    pub fn new(cluster: &str) -> Self {
        Self {
            kubectl_bin: "kubectl".to_string(),
            kube_context: format!("kind-{cluster}"),
        }
    }

    fn kubectl(&self) -> Command {
        let mut command = Command::new(&self.kubectl_bin);
        command.arg("--context").arg(&self.kube_context);
        command
    }

    fn provider_manifest(name: &str, package: &str) -> String {
        format!(
            "apiVersion: pkg.kubenest.io/v1\n\
             kind: Provider\n\
             metadata:\n\
             \x20 name: {name}\n\
             spec:\n\
             \x20 package: {package}\n"
        )
    }
}

impl ProviderInstaller for KubectlProviders {
    async fn install(&self, name: &str, package: &str, progress: ProgressFn<'_>) -> Result<()> {
        progress(&format!("installing provider {name} ({package})"));
        let mut command = self.kubectl();
        command.args(["apply", "-f", "-"]);
        let manifest = Self::provider_manifest(name, package);
        run_with_stdin(&format!("kubectl apply provider {name}"), command, &manifest, progress)
            .await
    }

    async fn status(&self) -> Result<Vec<ProviderStatus>> {
        let mut command = self.kubectl();
        command.args(["get", "providers.pkg.kubenest.io", "-o", "json"]);
        let output = run_capture("kubectl get providers", command).await?;
        let parsed: Value =
            serde_json::from_str(&output).context("parse provider list")?;
        Ok(parse_provider_statuses(&parsed))
    }
}

fn parse_provider_statuses(parsed: &Value) -> Vec<ProviderStatus> {
    let Some(items) = parsed["items"].as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .map(|item| {
            let conditions = item["status"]["conditions"]
                .as_array()
                .cloned()
                .unwrap_or_default();
            let healthy_condition = conditions
                .iter()
                .find(|condition| condition["type"].as_str() == Some("Healthy"));
            let healthy = healthy_condition
                .map(|condition| condition["status"].as_str() == Some("True"))
                .unwrap_or(false);
            ProviderStatus {
                name: item["metadata"]["name"].as_str().unwrap_or("").to_string(),
                package: item["spec"]["package"].as_str().unwrap_or("").to_string(),
                healthy,
                condition: "Healthy".to_string(),
                reason: healthy_condition
                    .and_then(|condition| condition["reason"].as_str())
                    .map(str::to_string),
                message: healthy_condition
                    .and_then(|condition| condition["message"].as_str())
                    .map(str::to_string),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_manifest_names_the_package() {
        let manifest =
            KubectlProviders::provider_manifest("provider-dns", "ghcr.io/kubenest/provider-dns:v0.3.0");
        assert!(manifest.contains("name: provider-dns"));
        assert!(manifest.contains("package: ghcr.io/kubenest/provider-dns:v0.3.0"));
    }

    #[test]
    fn parses_health_from_conditions() {
        let json: Value = serde_json::from_str(
            r#"{
                "items": [
                    {
                        "metadata": {"name": "provider-dns"},
                        "spec": {"package": "ghcr.io/kubenest/provider-dns:v0.3.0"},
                        "status": {"conditions": [
                            {"type": "Installed", "status": "True"},
                            {"type": "Healthy", "status": "True", "reason": "HealthyPackageRevision"}
                        ]}
                    },
                    {
                        "metadata": {"name": "provider-sql"},
                        "spec": {"package": "ghcr.io/kubenest/provider-sql:v0.1.0"},
                        "status": {"conditions": [
                            {"type": "Healthy", "status": "False", "reason": "UnhealthyPackageRevision",
                             "message": "cannot resolve package dependencies"}
                        ]}
                    }
                ]
            }"#,
        )
        .unwrap();
        let statuses = parse_provider_statuses(&json);
        assert_eq!(statuses.len(), 2);
        assert!(statuses[0].healthy);
        assert_eq!(statuses[0].reason.as_deref(), Some("HealthyPackageRevision"));
        assert!(!statuses[1].healthy);
        assert_eq!(
            statuses[1].message.as_deref(),
            Some("cannot resolve package dependencies")
        );
    }

    #[test]
    fn provider_without_conditions_reads_as_unhealthy() {
        let json: Value = serde_json::from_str(
            r#"{"items": [{"metadata": {"name": "fresh"}, "spec": {"package": "pkg"}, "status": {}}]}"#,
        )
        .unwrap();
        let statuses = parse_provider_statuses(&json);
        assert!(!statuses[0].healthy);
        assert!(statuses[0].reason.is_none());
    }
}
