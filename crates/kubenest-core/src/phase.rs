//! Phase state machine for the bootstrap sequence.
//!
//! Tracks the ordered stages of a single run. Transitions are state-only so
//! the worker can drive them without touching any output surface; rendering
//! happens elsewhere by consuming progress events.

use std::time::Instant;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PhaseStatus {
    Pending,
    Running,
    Complete,
    Skipped,
    Failed,
}

impl PhaseStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PhaseStatus::Complete | PhaseStatus::Skipped | PhaseStatus::Failed
        )
    }
}

/// One named stage of the bootstrap. Created before execution begins and
/// never removed; only its status (and the fields that go with it) mutate.
#[derive(Clone, Debug)]
pub struct Phase {
    pub name: String,
    pub status: PhaseStatus,
    pub message: Option<String>,
    pub skip_reason: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<Instant>,
    pub ended_at: Option<Instant>,
}

impl Phase {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: PhaseStatus::Pending,
            message: None,
            skip_reason: None,
            error: None,
            started_at: None,
            ended_at: None,
        }
    }

    /// Wall time spent in the phase, if it has both entered and exited.
    pub fn elapsed(&self) -> Option<std::time::Duration> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            _ => None,
        }
    }
}

/// Ordered phases plus a cursor for the phase currently running.
#[derive(Debug, Default)]
pub struct PhaseTracker {
    phases: Vec<Phase>,
    current: Option<usize>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a phase in Pending state.
    pub fn add(&mut self, name: &str) {
        self.phases.push(Phase::new(name));
    }

    /// Append a phase only when the configuration actually requires it, so
    /// the displayed plan matches what will run.
    pub fn add_if(&mut self, condition: bool, name: &str) {
        if condition {
            self.add(name);
        }
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Count of phases that participate in `[m/n]` progress labels.
    /// Skipped phases drop out of the denominator.
    pub fn active_count(&self) -> usize {
        self.phases
            .iter()
            .filter(|phase| phase.status != PhaseStatus::Skipped)
            .count()
    }

    /// 1-based position of the current phase among non-skipped phases.
    pub fn active_index(&self) -> usize {
        let Some(current) = self.current else {
            return 0;
        };
        self.phases[..=current]
            .iter()
            .filter(|phase| phase.status != PhaseStatus::Skipped)
            .count()
    }

    pub fn current(&self) -> Option<&Phase> {
        self.current.map(|index| &self.phases[index])
    }

    pub fn has_failed(&self) -> bool {
        self.phases
            .iter()
            .any(|phase| phase.status == PhaseStatus::Failed)
    }

    pub fn all_complete(&self) -> bool {
        !self.phases.is_empty()
            && self.phases.iter().all(|phase| {
                matches!(phase.status, PhaseStatus::Complete | PhaseStatus::Skipped)
            })
    }

    /// Move a pending phase to Running and point the cursor at it.
    /// Returns false (no side effect) for unknown names, phases that
    /// already left Pending, or while another phase is still Running.
    pub fn mark_running(&mut self, name: &str) -> bool {
        let Some(index) = self.index_of(name) else {
            return false;
        };
        if self.phases[index].status != PhaseStatus::Pending {
            return false;
        }
        // At most one phase runs at a time.
        if let Some(current) = self.current {
            if self.phases[current].status == PhaseStatus::Running {
                return false;
            }
        }
        let phase = &mut self.phases[index];
        phase.status = PhaseStatus::Running;
        phase.started_at = Some(Instant::now());
        self.current = Some(index);
        true
    }

    /// Complete the currently running phase.
    pub fn mark_complete(&mut self) -> bool {
        self.finish_current(PhaseStatus::Complete, None, None)
    }

    /// Complete the currently running phase with a summary note.
    pub fn mark_complete_with(&mut self, message: &str) -> bool {
        self.finish_current(PhaseStatus::Complete, Some(message.to_string()), None)
    }

    /// Skip a pending phase with a reason. Running phases cannot be skipped.
    pub fn mark_skipped(&mut self, name: &str, reason: &str) -> bool {
        let Some(index) = self.index_of(name) else {
            return false;
        };
        if self.phases[index].status != PhaseStatus::Pending {
            return false;
        }
        let phase = &mut self.phases[index];
        phase.status = PhaseStatus::Skipped;
        phase.skip_reason = Some(reason.to_string());
        true
    }

    /// Fail the currently running phase with an error description.
    pub fn mark_failed(&mut self, error: &str) -> bool {
        self.finish_current(PhaseStatus::Failed, None, Some(error.to_string()))
    }

    fn finish_current(
        &mut self,
        status: PhaseStatus,
        message: Option<String>,
        error: Option<String>,
    ) -> bool {
        let Some(index) = self.current else {
            return false;
        };
        let phase = &mut self.phases[index];
        if phase.status != PhaseStatus::Running {
            return false;
        }
        phase.status = status;
        phase.message = message;
        phase.error = error;
        phase.ended_at = Some(Instant::now());
        true
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.phases.iter().position(|phase| phase.name == name)
    }
}
