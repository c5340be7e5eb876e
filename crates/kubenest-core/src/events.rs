//! Progress events flowing from the bootstrap worker to the active renderer.
//!
//! Events travel one direction over a bounded channel; renderers consume them
//! in order and keep their own copies of phase and log state.

use std::time::Instant;

/// Point-in-time summary of one pod, for the optional pod panel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodSummary {
    pub name: String,
    pub namespace: String,
    pub phase: String,
    pub ready_containers: u32,
    pub total_containers: u32,
}

impl PodSummary {
    pub fn is_ready(&self) -> bool {
        self.phase == "Running" && self.ready_containers == self.total_containers
    }
}

/// Terminal outcome of a bootstrap run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOutcome {
    pub success: bool,
    pub message: String,
    pub error: Option<String>,
    /// Hint shown after a successful run, e.g. how to fetch the kubeconfig.
    pub next_steps: Option<String>,
}

impl RunOutcome {
    pub fn success(message: impl Into<String>, next_steps: Option<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
            next_steps,
        }
    }

    pub fn failure(message: impl Into<String>, error: Option<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error,
            next_steps: None,
        }
    }
}

/// Everything the worker can tell a renderer about run progress.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    PhaseStarted {
        name: String,
    },
    PhaseCompleted {
        name: String,
        message: Option<String>,
    },
    PhaseSkipped {
        name: String,
        reason: String,
    },
    PhaseFailed {
        name: String,
        error: String,
    },
    /// Fine-grained step inside the current phase. `ratio` is `None` for
    /// indeterminate work (spinner) or a 0.0..=1.0 fraction (bar).
    Operation {
        step: String,
        ratio: Option<f64>,
    },
    LogLine(String),
    PodSnapshot(Vec<PodSummary>),
    TimeoutExtended {
        deadline: Instant,
    },
    RunCompleted(RunOutcome),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_readiness_requires_running_phase_and_full_ready_ratio() {
        let mut pod = PodSummary {
            name: "etcd-0".into(),
            namespace: "kube-system".into(),
            phase: "Pending".into(),
            ready_containers: 1,
            total_containers: 1,
        };
        assert!(!pod.is_ready());
        pod.phase = "Running".into();
        assert!(pod.is_ready());
        pod.ready_containers = 0;
        assert!(!pod.is_ready());
    }

    #[test]
    fn outcome_constructors_set_expected_fields() {
        let ok = RunOutcome::success("cluster ready", Some("kubectl get pods".into()));
        assert!(ok.success);
        assert!(ok.error.is_none());
        assert_eq!(ok.next_steps.as_deref(), Some("kubectl get pods"));

        let failed = RunOutcome::failure("phase failed", Some("boom".into()));
        assert!(!failed.success);
        assert!(failed.next_steps.is_none());
    }
}
