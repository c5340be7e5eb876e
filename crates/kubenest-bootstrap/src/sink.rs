//! Progress sinks: how the executor reports progress without caring which
//! renderer is active.
//!
//! The executor is written once against [`ProgressSink`]. `ChannelSink`
//! feeds the interactive renderer over a bounded channel; `PlainSink`
//! prints synchronously for non-interactive output. Both must land on the
//! same terminal outcome for identical worker behavior.

use std::future::Future;
use std::io::{self, Write};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;

use kubenest_core::{PhaseTracker, ProgressEvent, RunOutcome};

pub trait ProgressSink: Send + Sync {
    /// Deliver an event, waiting for channel capacity if needed.
    fn emit(&self, event: ProgressEvent) -> impl Future<Output = ()> + Send;

    /// Best-effort synchronous delivery, for progress callbacks that cannot
    /// await. May drop events under backpressure.
    fn emit_now(&self, event: ProgressEvent);
}

/// Sink feeding the interactive renderer.
pub struct ChannelSink {
    sender: mpsc::Sender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::Sender<ProgressEvent>) -> Self {
        Self { sender }
    }
}

impl ProgressSink for ChannelSink {
    async fn emit(&self, event: ProgressEvent) {
        // A closed channel means the renderer is gone; the worker keeps
        // running and the outcome is still returned to the caller.
        let _ = self.sender.send(event).await;
    }

    fn emit_now(&self, event: ProgressEvent) {
        if self.sender.try_send(event).is_err() {
            debug!("dropping progress event; renderer is behind");
        }
    }
}

/// Synchronous line printer for non-interactive output. Keeps its own phase
/// tracker mirror so `[m/n]` labels match the interactive renderer.
pub struct PlainSink<W: Write + Send> {
    out: Mutex<W>,
    tracker: Mutex<PhaseTracker>,
    outcome: Mutex<Option<RunOutcome>>,
}

impl PlainSink<io::Stdout> {
    pub fn stdout(tracker: PhaseTracker) -> Self {
        Self::new(tracker, io::stdout())
    }
}

impl<W: Write + Send> PlainSink<W> {
    pub fn new(tracker: PhaseTracker, out: W) -> Self {
        let sink = Self {
            out: Mutex::new(out),
            tracker: Mutex::new(tracker),
            outcome: Mutex::new(None),
        };
        sink.print_plan();
        sink
    }

    /// The terminal outcome, once a RunCompleted event has arrived.
    pub fn outcome(&self) -> Option<RunOutcome> {
        self.outcome.lock().ok().and_then(|slot| slot.clone())
    }

    fn print_plan(&self) {
        let Ok(tracker) = self.tracker.lock() else {
            return;
        };
        self.line("planned phases:");
        for phase in tracker.phases() {
            self.line(&format!("  - {}", phase.name));
        }
    }

    fn line(&self, text: &str) {
        if let Ok(mut out) = self.out.lock() {
            let stamp = chrono::Local::now().format("%H:%M:%S");
            let _ = writeln!(out, "{stamp} {text}");
        }
    }

    fn handle(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::PhaseStarted { name } => {
                let Ok(mut tracker) = self.tracker.lock() else {
                    return;
                };
                tracker.mark_running(&name);
                let (index, count) = (tracker.active_index(), tracker.active_count());
                drop(tracker);
                self.line(&format!("[{index}/{count}] {name}"));
            }
            ProgressEvent::PhaseCompleted { name, message } => {
                if let Ok(mut tracker) = self.tracker.lock() {
                    match &message {
                        Some(message) => tracker.mark_complete_with(message),
                        None => tracker.mark_complete(),
                    };
                }
                match message {
                    Some(message) => self.line(&format!("  ok {name} ({message})")),
                    None => self.line(&format!("  ok {name}")),
                }
            }
            ProgressEvent::PhaseSkipped { name, reason } => {
                if let Ok(mut tracker) = self.tracker.lock() {
                    tracker.mark_skipped(&name, &reason);
                }
                self.line(&format!("  -- {name} (skipped: {reason})"));
            }
            ProgressEvent::PhaseFailed { name, error } => {
                if let Ok(mut tracker) = self.tracker.lock() {
                    tracker.mark_failed(&error);
                }
                self.line(&format!("  !! {name}: {error}"));
            }
            ProgressEvent::Operation { step, ratio } => match ratio {
                Some(ratio) => self.line(&format!("   > {step} ({:.0}%)", ratio * 100.0)),
                None => self.line(&format!("   > {step}")),
            },
            ProgressEvent::LogLine(text) => self.line(&format!("   | {text}")),
            ProgressEvent::PodSnapshot(pods) => {
                let ready = pods.iter().filter(|pod| pod.is_ready()).count();
                self.line(&format!("   pods ready: {ready}/{}", pods.len()));
            }
            ProgressEvent::TimeoutExtended { .. } => {
                self.line("   deadline extended");
            }
            ProgressEvent::RunCompleted(outcome) => {
                if outcome.success {
                    self.line(&format!("bootstrap complete: {}", outcome.message));
                    if let Some(next_steps) = &outcome.next_steps {
                        self.line(&format!("next steps: {next_steps}"));
                    }
                } else {
                    match &outcome.error {
                        Some(error) => {
                            self.line(&format!("bootstrap failed: {} ({error})", outcome.message))
                        }
                        None => self.line(&format!("bootstrap failed: {}", outcome.message)),
                    }
                    // Phases still running at cancellation were interrupted,
                    // not failed.
                    if let Ok(tracker) = self.tracker.lock() {
                        if let Some(current) = tracker.current() {
                            if current.status == kubenest_core::PhaseStatus::Running {
                                self.line(&format!("  interrupted: {}", current.name));
                            }
                        }
                    }
                }
                if let Ok(mut slot) = self.outcome.lock() {
                    *slot = Some(outcome);
                }
            }
        }
    }
}

impl<W: Write + Send> ProgressSink for PlainSink<W> {
    async fn emit(&self, event: ProgressEvent) {
        self.handle(event);
    }

    fn emit_now(&self, event: ProgressEvent) {
        self.handle(event);
    }
}
