//! View state for the interactive renderer.
//!
//! All input handling lives here as plain state transitions, so the whole
//! interactive behavior is testable without a terminal. The ratatui layer
//! only draws whatever this state says.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use kubenest_core::{PhaseTracker, PodSummary, ProgressEvent, RunOutcome};

// Oldest log lines are dropped beyond this.
pub const MAX_LOG_HISTORY: usize = 500;

const SPINNER_FRAMES: usize = 4;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ViewAction {
    // Nothing changed.
    None,
    // State changed; redraw the frame.
    Redraw,
    // User asked for more time before the deadline.
    ExtendRequested,
    // User asked to stop the run.
    CancelRequested,
    // Leave the UI loop.
    Quit,
}

pub struct BootstrapView {
    // Cluster name for the header.
    pub cluster_name: String,

    // Where the configuration came from, for the header.
    pub config_source: String,

    // Renderer's mirror of phase state, driven by worker events.
    pub tracker: PhaseTracker,

    // Current deadline; moves forward on extensions.
    pub deadline: Instant,

    // Step line under the running phase, with an optional completion ratio.
    pub operation: Option<(String, Option<f64>)>,

    // Latest pod snapshot.
    pub pods: Vec<PodSummary>,

    // Panel toggles.
    pub show_pods: bool,
    pub verbose_logs: bool,

    // Terminal outcome, once the worker finished.
    pub outcome: Option<RunOutcome>,

    // Animation frame for the running-phase spinner.
    pub spinner_frame: usize,

    // Set once the user asked to cancel; the final event then quits
    // without another keypress.
    cancel_requested: bool,

    // Bounded log history.
    logs: VecDeque<String>,

    // Index of the first visible log line; None follows the tail.
    scroll: Option<usize>,
}

impl BootstrapView {
    pub fn new(
        cluster_name: impl Into<String>,
        config_source: impl Into<String>,
        tracker: PhaseTracker,
        deadline: Instant,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            config_source: config_source.into(),
            tracker,
            deadline,
            operation: None,
            pods: Vec::new(),
            show_pods: false,
            verbose_logs: false,
            outcome: None,
            spinner_frame: 0,
            cancel_requested: false,
            logs: VecDeque::new(),
            scroll: None,
        }
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }

    pub fn logs(&self) -> impl Iterator<Item = &str> {
        self.logs.iter().map(String::as_str)
    }

    /// Log lines to show in a panel of `height` rows, honoring scroll state.
    pub fn visible_logs(&self, height: usize) -> Vec<&str> {
        let start = match self.scroll {
            Some(start) => start.min(self.logs.len().saturating_sub(1)),
            None => self.logs.len().saturating_sub(height),
        };
        self.logs
            .iter()
            .skip(start)
            .take(height)
            .map(String::as_str)
            .collect()
    }

    pub fn following_tail(&self) -> bool {
        self.scroll.is_none()
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
        // After the outcome, any key leaves.
        if self.outcome.is_some() {
            return ViewAction::Quit;
        }

        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.cancel_requested = true;
            return ViewAction::CancelRequested;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => {
                self.cancel_requested = true;
                ViewAction::CancelRequested
            }
            KeyCode::Char('e') | KeyCode::Char('E') => ViewAction::ExtendRequested,
            KeyCode::Char('p') | KeyCode::Char('P') => {
                self.show_pods = !self.show_pods;
                ViewAction::Redraw
            }
            KeyCode::Char('v') | KeyCode::Char('V') => {
                self.verbose_logs = !self.verbose_logs;
                ViewAction::Redraw
            }
            KeyCode::Up => {
                self.scroll_by(-1);
                ViewAction::Redraw
            }
            KeyCode::Down => {
                self.scroll_by(1);
                ViewAction::Redraw
            }
            KeyCode::PageUp => {
                self.scroll_by(-10);
                ViewAction::Redraw
            }
            KeyCode::PageDown => {
                self.scroll_by(10);
                ViewAction::Redraw
            }
            KeyCode::End => {
                self.scroll = None;
                ViewAction::Redraw
            }
            _ => ViewAction::None,
        }
    }

    pub fn handle_event(&mut self, event: ProgressEvent) -> ViewAction {
        match event {
            ProgressEvent::PhaseStarted { name } => {
                self.tracker.mark_running(&name);
                self.operation = None;
            }
            ProgressEvent::PhaseCompleted { message, .. } => {
                match &message {
                    Some(message) => self.tracker.mark_complete_with(message),
                    None => self.tracker.mark_complete(),
                };
                self.operation = None;
            }
            ProgressEvent::PhaseSkipped { name, reason } => {
                self.tracker.mark_skipped(&name, &reason);
            }
            ProgressEvent::PhaseFailed { error, .. } => {
                self.tracker.mark_failed(&error);
                self.operation = None;
            }
            ProgressEvent::Operation { step, ratio } => {
                self.operation = Some((step, ratio));
            }
            ProgressEvent::LogLine(line) => self.push_log(line),
            ProgressEvent::PodSnapshot(pods) => self.pods = pods,
            ProgressEvent::TimeoutExtended { deadline } => self.deadline = deadline,
            ProgressEvent::RunCompleted(outcome) => {
                self.operation = None;
                self.outcome = Some(outcome);
                if self.cancel_requested {
                    return ViewAction::Quit;
                }
            }
        }
        ViewAction::Redraw
    }

    pub fn tick(&mut self) -> ViewAction {
        self.spinner_frame = (self.spinner_frame + 1) % SPINNER_FRAMES;
        ViewAction::Redraw
    }

    fn push_log(&mut self, line: String) {
        if self.logs.len() == MAX_LOG_HISTORY {
            self.logs.pop_front();
            // Keep a manual scroll anchored to the same line.
            if let Some(scroll) = &mut self.scroll {
                *scroll = scroll.saturating_sub(1);
            }
        }
        self.logs.push_back(line);
    }

    fn scroll_by(&mut self, delta: isize) {
        let current = self
            .scroll
            .unwrap_or_else(|| self.logs.len().saturating_sub(1));
        let next = current.saturating_add_signed(delta);
        if next + 1 >= self.logs.len() {
            // Scrolled past the end; resume following.
            self.scroll = None;
        } else {
            self.scroll = Some(next);
        }
    }
}
