//! Failure diagnostics report model.
//!
//! Built fresh when a phase fails, rendered once, then discarded. Rendering
//! truncates for display only; the underlying report is never mutated.

use crate::util::truncate_to_width;

const MESSAGE_WIDTH: usize = 96;
const LOG_WIDTH: usize = 120;

/// Status of one pod condition, e.g. `Ready=False (ContainersNotReady)`.
#[derive(Clone, Debug)]
pub struct ConditionDiagnostic {
    pub kind: String,
    pub status: String,
    pub reason: Option<String>,
}

/// Why a container is not making progress, with a bounded log tail.
#[derive(Clone, Debug)]
pub struct ContainerDiagnostic {
    pub name: String,
    /// Waiting or terminated reason, e.g. `CrashLoopBackOff`.
    pub state_reason: String,
    pub message: Option<String>,
    pub log_tail: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct PodDiagnostic {
    pub name: String,
    pub namespace: String,
    pub phase: String,
    pub ready_containers: u32,
    pub total_containers: u32,
    pub conditions: Vec<ConditionDiagnostic>,
    /// Populated for unhealthy containers only.
    pub containers: Vec<ContainerDiagnostic>,
}

#[derive(Clone, Debug)]
pub struct ProviderDiagnostic {
    pub name: String,
    pub package: String,
    pub healthy: Option<bool>,
    pub condition: String,
    pub reason: Option<String>,
    pub message: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ReleaseDiagnostic {
    pub name: String,
    pub namespace: String,
    pub status: String,
    pub error: Option<String>,
}

/// Everything collected about one failed stage.
#[derive(Clone, Debug, Default)]
pub struct DiagnosticsReport {
    /// The component the failing phase was operating on.
    pub component: String,
    pub pods: Vec<PodDiagnostic>,
    pub providers: Vec<ProviderDiagnostic>,
    pub release: Option<ReleaseDiagnostic>,
    /// Collection steps that degraded instead of producing data.
    pub notes: Vec<String>,
}

impl DiagnosticsReport {
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
            && self.providers.is_empty()
            && self.release.is_none()
            && self.notes.is_empty()
    }

    /// Render the report as display lines. Presentation-only: long messages
    /// and log lines are truncated to fixed widths without touching `self`.
    pub fn render_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        lines.push(format!("Diagnostics for {}:", self.component));

        for pod in &self.pods {
            lines.push(format!(
                "  pod {}/{}: {} ({}/{} ready)",
                pod.namespace, pod.name, pod.phase, pod.ready_containers, pod.total_containers
            ));
            for condition in &pod.conditions {
                let reason = condition
                    .reason
                    .as_deref()
                    .map(|reason| format!(" ({reason})"))
                    .unwrap_or_default();
                lines.push(format!(
                    "    condition {}={}{}",
                    condition.kind, condition.status, reason
                ));
            }
            for container in &pod.containers {
                let message = container
                    .message
                    .as_deref()
                    .map(|message| format!(": {}", truncate_to_width(message, MESSAGE_WIDTH)))
                    .unwrap_or_default();
                lines.push(format!(
                    "    container {} {}{}",
                    container.name, container.state_reason, message
                ));
                for log in &container.log_tail {
                    lines.push(format!("      | {}", truncate_to_width(log, LOG_WIDTH)));
                }
            }
        }

        for provider in &self.providers {
            let health = match provider.healthy {
                Some(true) => "healthy",
                Some(false) => "unhealthy",
                None => "unknown",
            };
            let mut line = format!(
                "  provider {} ({}): {} {}",
                provider.name, provider.package, provider.condition, health
            );
            if let Some(reason) = &provider.reason {
                line.push_str(&format!(", reason {reason}"));
            }
            lines.push(line);
            if let Some(message) = &provider.message {
                lines.push(format!("    {}", truncate_to_width(message, MESSAGE_WIDTH)));
            }
        }

        if let Some(release) = &self.release {
            lines.push(format!(
                "  release {}/{}: {}",
                release.namespace, release.name, release.status
            ));
            if let Some(error) = &release.error {
                lines.push(format!("    {}", truncate_to_width(error, MESSAGE_WIDTH)));
            }
        }

        for note in &self.notes {
            lines.push(format!("  note: {}", truncate_to_width(note, MESSAGE_WIDTH)));
        }

        if self.is_empty() {
            lines.push("  nothing collected".to_string());
        }

        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crashing_pod(message: &str) -> PodDiagnostic {
        PodDiagnostic {
            name: "control-plane-0".into(),
            namespace: "kubenest-system".into(),
            phase: "Running".into(),
            ready_containers: 0,
            total_containers: 1,
            conditions: vec![ConditionDiagnostic {
                kind: "Ready".into(),
                status: "False".into(),
                reason: Some("ContainersNotReady".into()),
            }],
            containers: vec![ContainerDiagnostic {
                name: "manager".into(),
                state_reason: "CrashLoopBackOff".into(),
                message: Some(message.to_string()),
                log_tail: vec!["panic: connection refused".into()],
            }],
        }
    }

    #[test]
    fn render_truncates_without_mutating_the_report() {
        let long_message = "x".repeat(400);
        let mut report = DiagnosticsReport::new("control plane");
        report.pods.push(crashing_pod(&long_message));

        let lines = report.render_lines();
        assert!(lines
            .iter()
            .any(|line| line.contains("CrashLoopBackOff") && line.ends_with("...")));
        // The report still holds the full message.
        assert_eq!(
            report.pods[0].containers[0].message.as_deref(),
            Some(long_message.as_str())
        );
    }

    #[test]
    fn empty_report_renders_a_placeholder() {
        let report = DiagnosticsReport::new("charts");
        assert!(report.is_empty());
        let lines = report.render_lines();
        assert_eq!(lines.last().map(String::as_str), Some("  nothing collected"));
    }

    #[test]
    fn degraded_collection_appears_as_notes() {
        let mut report = DiagnosticsReport::new("providers");
        report
            .notes
            .push("provider status unavailable: kubectl exited with 1".into());
        assert!(!report.is_empty());
        let lines = report.render_lines();
        assert!(lines.iter().any(|line| line.contains("note: provider status")));
    }
}
