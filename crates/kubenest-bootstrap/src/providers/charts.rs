//! Chart installs via the `helm` CLI.

use anyhow::Result;
use tokio::process::Command;

use kubenest_core::ChartSpec;

use super::{run_streaming, ChartInstallOptions, ChartInstaller};

pub struct HelmInstaller {
    helm_bin: String,
    kube_context: String,
}

impl HelmInstaller {
    pub fn new(cluster: &str) -> Self {
        Self {
            helm_bin: "helm".to_string(),
            kube_context: format!("kind-{cluster}"),
        }
    }
}

impl ChartInstaller for HelmInstaller {
    async fn install(&self, spec: &ChartSpec, options: ChartInstallOptions<'_>) -> Result<()> {
        let values = match options.values_transform {
            Some(transform) => transform(spec.values.clone()),
            None => spec.values.clone(),
        };

        // Surface the merged install parameters before running helm.
        if values.is_empty() {
            (options.log)(&format!("installing {} with default values", spec.name));
        } else {
            let merged: Vec<String> = values
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect();
            (options.log)(&format!(
                "installing {} with values: {}",
                spec.name,
                merged.join(", ")
            ));
        }

        let mut command = Command::new(&self.helm_bin);
        command.args([
            "upgrade",
            "--install",
            &spec.name,
            &spec.chart,
            "--kube-context",
            &self.kube_context,
            "--namespace",
            &spec.namespace,
            "--create-namespace",
            "--wait",
        ]);
        if let Some(repo) = &spec.repo {
            command.args(["--repo", repo]);
        }
        if let Some(version) = &spec.version {
            command.args(["--version", version]);
        }
        for (key, value) in &values {
            command.args(["--set", &format!("{key}={value}")]);
        }

        run_streaming(&format!("helm install {}", spec.name), command, options.log).await
    }
}
