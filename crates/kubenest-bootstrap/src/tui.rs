//! Interactive renderer: ratatui drawing plus the input/event loop.
//!
//! The loop owns the terminal; all state transitions happen in
//! [`BootstrapView`]. Worker events arrive on a bounded channel, keyboard
//! input on a dedicated reader thread, and a 1Hz tick drives the countdown
//! and spinner.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event::{Event, KeyEventKind};
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Gauge, List, ListItem, Paragraph};
use ratatui::Frame;
use tokio::sync::mpsc;
use tracing::debug;

use kubenest_core::util::{format_countdown, format_duration, truncate_to_width};
use kubenest_core::{
    CancelReason, PhaseStatus, PodSummary, ProgressEvent, RunOutcome, RunScope,
};

use crate::terminal::TerminalGuard;
use crate::view::{BootstrapView, ViewAction};

const SPINNER: [&str; 4] = ["|", "/", "-", "\\"];

/// Run the interactive renderer until the user leaves. Returns the outcome
/// the view observed, if the worker finished before the user quit.
pub async fn run(
    scope: Arc<RunScope>,
    extend_increment: Duration,
    mut view: BootstrapView,
    mut events: mpsc::Receiver<ProgressEvent>,
) -> Result<Option<RunOutcome>> {
    let mut guard = TerminalGuard::new().context("set up terminal")?;
    let result = run_loop(&scope, extend_increment, &mut view, &mut events, &mut guard).await;
    guard.restore().context("restore terminal")?;
    result?;
    Ok(view.outcome)
}

fn spawn_input_thread(sender: mpsc::Sender<Event>) {
    // crossterm reads block, so input gets its own thread. The thread ends
    // when the receiver side is dropped.
    std::thread::spawn(move || loop {
        match crossterm::event::read() {
            Ok(event) => {
                if sender.blocking_send(event).is_err() {
                    break;
                }
            }
            Err(err) => {
                debug!("input thread stopping: {err}");
                break;
            }
        }
    });
}

async fn run_loop(
    scope: &RunScope,
    extend_increment: Duration,
    view: &mut BootstrapView,
    events: &mut mpsc::Receiver<ProgressEvent>,
    guard: &mut TerminalGuard,
) -> Result<()> {
    let (input_tx, mut input_rx) = mpsc::channel::<Event>(32);
    spawn_input_thread(input_tx);

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    // The worker closes its end after RunCompleted; stop polling then.
    let mut events_open = true;

    guard.terminal_mut().draw(|frame| draw(frame, view))?;

    loop {
        let action = tokio::select! {
            maybe_event = events.recv(), if events_open => match maybe_event {
                Some(event) => view.handle_event(event),
                None => {
                    events_open = false;
                    ViewAction::Redraw
                }
            },
            maybe_input = input_rx.recv() => match maybe_input {
                Some(Event::Key(key)) if key.kind != KeyEventKind::Release => {
                    view.handle_key(key)
                }
                Some(Event::Resize(_, _)) => ViewAction::Redraw,
                Some(_) => ViewAction::None,
                None => ViewAction::Quit,
            },
            _ = ticker.tick() => view.tick(),
        };

        match action {
            ViewAction::None => continue,
            ViewAction::Redraw => {}
            ViewAction::ExtendRequested => {
                // The scope decides; a denied extension changes nothing.
                if let Some(deadline) = scope.extend(extend_increment) {
                    view.handle_event(ProgressEvent::TimeoutExtended { deadline });
                }
            }
            ViewAction::CancelRequested => {
                scope.cancel(CancelReason::UserQuit);
            }
            ViewAction::Quit => return Ok(()),
        }

        guard.terminal_mut().draw(|frame| draw(frame, view))?;
    }
}

pub fn draw(frame: &mut Frame<'_>, view: &BootstrapView) {
    let phase_rows = view.tracker.phases().len() as u16 + 2;
    let mut constraints = vec![
        Constraint::Length(3),
        Constraint::Length(phase_rows),
        Constraint::Length(3),
        Constraint::Min(5),
    ];
    if view.show_pods {
        constraints.push(Constraint::Length(pod_panel_height(&view.pods)));
    }
    constraints.push(Constraint::Length(3));

    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(frame.area());

    draw_header(frame, layout[0], view);
    draw_phases(frame, layout[1], view);
    draw_operation(frame, layout[2], view);
    draw_logs(frame, layout[3], view);
    if view.show_pods {
        draw_pods(frame, layout[4], view);
    }
    draw_footer(frame, layout[layout.len() - 1], view);
}

fn draw_header(frame: &mut Frame<'_>, area: Rect, view: &BootstrapView) {
    let countdown = format_countdown(view.remaining(Instant::now()));
    let title = Line::from(vec![
        Span::styled(
            format!("kubenest: {}", view.cluster_name),
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!("  ({})", view.config_source)),
    ]);
    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(
            format!(" {countdown} remaining "),
            Style::default().fg(if view.remaining(Instant::now()) < Duration::from_secs(60) {
                Color::Red
            } else {
                Color::Gray
            }),
        ))
        .title_alignment(Alignment::Right);
    frame.render_widget(Paragraph::new(title).block(block), area);
}

fn draw_phases(frame: &mut Frame<'_>, area: Rect, view: &BootstrapView) {
    let inner_width = area.width.saturating_sub(2) as usize;
    let spinner = SPINNER[view.spinner_frame % SPINNER.len()];
    // A failed outcome with a phase still Running means the run was cut
    // short; the spinner would misleadingly keep going.
    let interrupted = view
        .outcome
        .as_ref()
        .is_some_and(|outcome| !outcome.success);
    let items = view
        .tracker
        .phases()
        .iter()
        .map(|phase| {
            let (symbol, style) = match phase.status {
                PhaseStatus::Pending => {
                    ("[ ]".to_string(), Style::default().fg(Color::Gray))
                }
                PhaseStatus::Running if interrupted => {
                    ("[--]".to_string(), Style::default().fg(Color::Yellow))
                }
                PhaseStatus::Running => {
                    (format!("[{spinner}]"), Style::default().fg(Color::Yellow))
                }
                PhaseStatus::Complete => ("[ok]".to_string(), Style::default().fg(Color::Green)),
                PhaseStatus::Skipped => ("[--]".to_string(), Style::default().fg(Color::Gray)),
                PhaseStatus::Failed => ("[!!]".to_string(), Style::default().fg(Color::Red)),
            };

            let mut label = phase.name.clone();
            match phase.status {
                PhaseStatus::Complete => {
                    if let Some(message) = &phase.message {
                        label.push_str(&format!(" ({message})"));
                    }
                    if let Some(elapsed) = phase.elapsed() {
                        label.push_str(&format!(" [{}]", format_duration(elapsed)));
                    }
                }
                PhaseStatus::Skipped => {
                    if let Some(reason) = &phase.skip_reason {
                        label.push_str(&format!(" (skipped: {reason})"));
                    }
                }
                PhaseStatus::Failed => {
                    if let Some(error) = &phase.error {
                        label.push_str(&format!(": {error}"));
                    }
                }
                PhaseStatus::Running if interrupted => {
                    label.push_str(" (interrupted)");
                }
                PhaseStatus::Running => {
                    if let Some(started) = phase.started_at {
                        label.push_str(&format!(" [{}]", format_duration(started.elapsed())));
                    }
                }
                PhaseStatus::Pending => {}
            }

            let available = inner_width.saturating_sub(5);
            let label = truncate_to_width(&label, available);
            ListItem::new(Line::from(vec![
                Span::styled(symbol, style.add_modifier(Modifier::BOLD)),
                Span::raw(" "),
                Span::raw(label),
            ]))
        })
        .collect::<Vec<_>>();

    let block = Block::default().title("Phases").borders(Borders::ALL);
    frame.render_widget(List::new(items).block(block), area);
}

fn draw_operation(frame: &mut Frame<'_>, area: Rect, view: &BootstrapView) {
    let block = Block::default().title("Current step").borders(Borders::ALL);
    match &view.operation {
        Some((step, Some(ratio))) => {
            let gauge = Gauge::default()
                .block(block)
                .gauge_style(Style::default().fg(Color::Cyan))
                .ratio(ratio.clamp(0.0, 1.0))
                .label(truncate_to_width(step, area.width.saturating_sub(4) as usize));
            frame.render_widget(gauge, area);
        }
        Some((step, None)) => {
            let spinner = SPINNER[view.spinner_frame % SPINNER.len()];
            let text = truncate_to_width(
                &format!("{spinner} {step}"),
                area.width.saturating_sub(2) as usize,
            );
            frame.render_widget(Paragraph::new(text).block(block), area);
        }
        None => {
            frame.render_widget(Paragraph::new("").block(block), area);
        }
    }
}

fn draw_logs(frame: &mut Frame<'_>, area: Rect, view: &BootstrapView) {
    let height = area.height.saturating_sub(2) as usize;
    let inner_width = area.width.saturating_sub(2) as usize;
    let lines = view
        .visible_logs(height)
        .into_iter()
        .map(|line| Line::from(truncate_to_width(line, inner_width)))
        .collect::<Vec<_>>();

    let title = if view.following_tail() {
        "Logs"
    } else {
        "Logs (scrolled; End = follow)"
    };
    let block = Block::default().title(title).borders(Borders::ALL);
    frame.render_widget(Paragraph::new(Text::from(lines)).block(block), area);
}

fn pod_panel_height(pods: &[PodSummary]) -> u16 {
    (pods.len() as u16).clamp(1, 8) + 2
}

fn draw_pods(frame: &mut Frame<'_>, area: Rect, view: &BootstrapView) {
    let inner_width = area.width.saturating_sub(2) as usize;
    let items = view
        .pods
        .iter()
        .map(|pod| {
            let (symbol, style) = if pod.is_ready() {
                ("[ok]", Style::default().fg(Color::Green))
            } else {
                ("[..]", Style::default().fg(Color::Yellow))
            };
            let label = truncate_to_width(
                &format!(
                    "{}/{} {} ({}/{})",
                    pod.namespace, pod.name, pod.phase, pod.ready_containers, pod.total_containers
                ),
                inner_width.saturating_sub(5),
            );
            ListItem::new(Line::from(vec![
                Span::styled(symbol, style),
                Span::raw(" "),
                Span::raw(label),
            ]))
        })
        .collect::<Vec<_>>();

    let block = Block::default().title("Pods").borders(Borders::ALL);
    frame.render_widget(List::new(items).block(block), area);
}

fn draw_footer(frame: &mut Frame<'_>, area: Rect, view: &BootstrapView) {
    let line = match &view.outcome {
        Some(outcome) => {
            let (label, color) = if outcome.success {
                ("done", Color::Green)
            } else {
                ("failed", Color::Red)
            };
            Line::from(vec![
                Span::styled(
                    format!("{label}: {}", outcome.message),
                    Style::default().fg(color).add_modifier(Modifier::BOLD),
                ),
                Span::raw("  press any key to exit"),
            ])
        }
        None => Line::from(vec![
            Span::styled("E", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(" = extend timeout  "),
            Span::styled("P", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(" = pods  "),
            Span::styled("V", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(" = verbose  "),
            Span::styled("Up/Down", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(" = scroll  "),
            Span::styled("Q", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(" = cancel"),
        ]),
    };
    let footer = Paragraph::new(Text::from(line))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::TOP));
    frame.render_widget(footer, area);
}
