//! Failure diagnostics collection.
//!
//! When a phase fails, the executor collects pod, provider, and release
//! diagnostics scoped to the failing component. Collection failures degrade
//! into report notes; partial diagnostics are better than none.

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

use kubenest_core::{
    ConditionDiagnostic, ContainerDiagnostic, DiagnosticsReport, PodDiagnostic, ProgressEvent,
    ProviderDiagnostic, ReleaseDiagnostic,
};

use crate::providers::run_capture;

use std::future::Future;

pub const DEFAULT_MAX_LOG_LINES: usize = 20;

/// Scope for one diagnostics collection pass.
#[derive(Clone, Debug)]
pub struct DiagnosticsContext {
    pub component: String,
    pub namespace: Option<String>,
    pub release: Option<String>,
    pub selector: Option<String>,
    pub max_log_lines: usize,
    /// Providers are only inspected for control-plane and dependency-install
    /// failures.
    pub include_providers: bool,
}

/// Read-only diagnostics queries against the managed cluster.
pub trait DiagnosticsSource: Send + Sync {
    fn pods(
        &self,
        namespace: &str,
        selector: Option<&str>,
        max_log_lines: usize,
    ) -> impl Future<Output = Result<Vec<PodDiagnostic>>> + Send;

    fn providers(&self) -> impl Future<Output = Result<Vec<ProviderDiagnostic>>> + Send;

    fn release(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<ReleaseDiagnostic>> + Send;
}

/// Consumes a finished report and renders it somewhere visible.
pub trait DiagnosticsSink: Send + Sync {
    fn render(&self, report: &DiagnosticsReport);
}

/// Collect a report for the given scope. Never fails: each collection step
/// that errors is absorbed into a note on the report.
pub async fn collect<S: DiagnosticsSource>(
    source: &S,
    ctx: &DiagnosticsContext,
) -> DiagnosticsReport {
    let mut report = DiagnosticsReport::new(&ctx.component);

    if let Some(namespace) = &ctx.namespace {
        match source
            .pods(namespace, ctx.selector.as_deref(), ctx.max_log_lines)
            .await
        {
            Ok(pods) => report.pods = pods,
            Err(err) => report
                .notes
                .push(format!("pod diagnostics unavailable: {err:#}")),
        }
    }

    if ctx.include_providers {
        match source.providers().await {
            Ok(providers) => report.providers = providers,
            Err(err) => report
                .notes
                .push(format!("provider diagnostics unavailable: {err:#}")),
        }
    }

    if let (Some(namespace), Some(release)) = (&ctx.namespace, &ctx.release) {
        match source.release(namespace, release).await {
            Ok(release) => report.release = Some(release),
            Err(err) => report
                .notes
                .push(format!("release diagnostics unavailable: {err:#}")),
        }
    }

    report
}

/// Writes report lines to stderr. Used by the plain renderer path.
pub struct StderrDiagnostics;

impl DiagnosticsSink for StderrDiagnostics {
    fn render(&self, report: &DiagnosticsReport) {
        for line in report.render_lines() {
            eprintln!("{line}");
        }
    }
}

/// Forwards report lines into the progress event stream so the interactive
/// renderer can show them in its log panel without corrupting the screen.
pub struct EventDiagnostics {
    sender: mpsc::Sender<ProgressEvent>,
}

impl EventDiagnostics {
    pub fn new(sender: mpsc::Sender<ProgressEvent>) -> Self {
        Self { sender }
    }
}

impl DiagnosticsSink for EventDiagnostics {
    fn render(&self, report: &DiagnosticsReport) {
        for line in report.render_lines() {
            if self.sender.try_send(ProgressEvent::LogLine(line)).is_err() {
                debug!("dropping diagnostics line; renderer is behind");
            }
        }
    }
}

/// Production diagnostics source shelling out to kubectl and helm.
pub struct KubectlDiagnostics {
    kubectl_bin: String,
    helm_bin: String,
    kube_context: String,
}

impl KubectlDiagnostics {
    pub fn new(cluster: &str) -> Self {
        Self {
            kubectl_bin: "kubectl".to_string(),
            helm_bin: "helm".to_string(),
            kube_context: format!("kind-{cluster}"),
        }
    }

    fn kubectl(&self) -> Command {
        let mut command = Command::new(&self.kubectl_bin);
        command.arg("--context").arg(&self.kube_context);
        command
    }

    async fn container_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        max_lines: usize,
    ) -> Vec<String> {
        let mut command = self.kubectl();
        command.args([
            "logs",
            pod,
            "-c",
            container,
            "-n",
            namespace,
            "--tail",
            &max_lines.to_string(),
        ]);
        match run_capture("kubectl logs", command).await {
            Ok(output) => output.lines().map(str::to_string).collect(),
            Err(err) => vec![format!("(logs unavailable: {err:#})")],
        }
    }
}

impl DiagnosticsSource for KubectlDiagnostics {
    async fn pods(
        &self,
        namespace: &str,
        selector: Option<&str>,
        max_log_lines: usize,
    ) -> Result<Vec<PodDiagnostic>> {
        let mut command = self.kubectl();
        command.args(["get", "pods", "-n", namespace, "-o", "json"]);
        if let Some(selector) = selector {
            command.args(["-l", selector]);
        }
        let output = run_capture("kubectl get pods", command).await?;
        let parsed: Value = serde_json::from_str(&output).context("parse pod list")?;
        let mut pods = parse_pod_diagnostics(&parsed);

        // Fetch log tails for unhealthy containers only.
        for pod in &mut pods {
            let pod_name = pod.name.clone();
            for container in &mut pod.containers {
                container.log_tail = self
                    .container_logs(namespace, &pod_name, &container.name, max_log_lines)
                    .await;
            }
        }
        Ok(pods)
    }

    async fn providers(&self) -> Result<Vec<ProviderDiagnostic>> {
        let mut command = self.kubectl();
        command.args(["get", "providers.pkg.kubenest.io", "-o", "json"]);
        let output = run_capture("kubectl get providers", command).await?;
        let parsed: Value = serde_json::from_str(&output).context("parse provider list")?;
        Ok(parse_provider_diagnostics(&parsed))
    }

    async fn release(&self, namespace: &str, name: &str) -> Result<ReleaseDiagnostic> {
        let mut command = Command::new(&self.helm_bin);
        command.args([
            "status",
            name,
            "--kube-context",
            &self.kube_context,
            "-n",
            namespace,
            "-o",
            "json",
        ]);
        let output = run_capture("helm status", command).await?;
        let parsed: Value = serde_json::from_str(&output).context("parse release status")?;
        Ok(ReleaseDiagnostic {
            name: name.to_string(),
            namespace: namespace.to_string(),
            status: parsed["info"]["status"]
                .as_str()
                .unwrap_or("unknown")
                .to_string(),
            error: parsed["info"]["description"].as_str().map(str::to_string),
        })
    }
}

fn parse_pod_diagnostics(parsed: &Value) -> Vec<PodDiagnostic> {
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

            let conditions = item["status"]["conditions"]
                .as_array()
                .map(|conditions| {
                    conditions
                        .iter()
                        .map(|condition| ConditionDiagnostic {
                            kind: condition["type"].as_str().unwrap_or("").to_string(),
                            status: condition["status"].as_str().unwrap_or("").to_string(),
                            reason: condition["reason"].as_str().map(str::to_string),
                        })
                        .collect()
                })
                .unwrap_or_default();

            // Only unhealthy containers carry a state reason worth surfacing.
            let containers = statuses
                .iter()
                .filter(|status| !status["ready"].as_bool().unwrap_or(false))
                .filter_map(|status| {
                    let name = status["name"].as_str().unwrap_or("").to_string();
                    let waiting = &status["state"]["waiting"];
                    let terminated = &status["state"]["terminated"];
                    let (reason, message) = if !waiting.is_null() {
                        (
                            waiting["reason"].as_str().unwrap_or("Waiting").to_string(),
                            waiting["message"].as_str().map(str::to_string),
                        )
                    } else if !terminated.is_null() {
                        (
                            terminated["reason"].as_str().unwrap_or("Terminated").to_string(),
                            terminated["message"].as_str().map(str::to_string),
                        )
                    } else {
                        return None;
                    };
                    Some(ContainerDiagnostic {
                        name,
                        state_reason: reason,
                        message,
                        log_tail: Vec::new(),
                    })
                })
                .collect();

            PodDiagnostic {
                name: item["metadata"]["name"].as_str().unwrap_or("").to_string(),
                namespace: item["metadata"]["namespace"]
                    .as_str()
                    .unwrap_or("")
                    .to_string(),
                phase: item["status"]["phase"].as_str().unwrap_or("Unknown").to_string(),
                ready_containers: ready,
                total_containers: statuses.len() as u32,
                conditions,
                containers,
            }
        })
        .collect()
}

fn parse_provider_diagnostics(parsed: &Value) -> Vec<ProviderDiagnostic> {
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
            ProviderDiagnostic {
                name: item["metadata"]["name"].as_str().unwrap_or("").to_string(),
                package: item["spec"]["package"].as_str().unwrap_or("").to_string(),
                healthy: healthy_condition
                    .map(|condition| condition["status"].as_str() == Some("True")),
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
