//! Entry points wiring the executor to a renderer.
//!
//! Both entry points build the same scope, watchdog, and phase plan; they
//! differ only in which sink and diagnostics sink the worker reports
//! through. The returned outcome always comes from the worker, so both
//! modes agree by construction.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use kubenest_core::{CancelReason, Config, RunOutcome, RunScope};

use crate::diagnostics::{DiagnosticsSource, EventDiagnostics, StderrDiagnostics};
use crate::executor::{execute, plan, Deps, RunOptions};
use crate::providers::{ChartInstaller, ClusterLifecycle, ProviderInstaller};
use crate::sink::{ChannelSink, PlainSink};
use crate::tui;
use crate::view::BootstrapView;

// Worker events queue up to this depth before the worker awaits capacity.
const EVENT_CHANNEL_DEPTH: usize = 256;

/// Bootstrap with the full-screen renderer. The worker runs on its own
/// task; the renderer owns the terminal until the user leaves.
pub async fn run_interactive<C, H, P, D>(
    parent: &CancellationToken,
    config: Config,
    options: RunOptions,
    cluster: C,
    charts: H,
    providers: P,
    diagnostics: D,
) -> Result<RunOutcome>
where
    C: ClusterLifecycle + Send + Sync + 'static,
    H: ChartInstaller + Send + Sync + 'static,
    P: ProviderInstaller + Send + Sync + 'static,
    D: DiagnosticsSource + Send + Sync + 'static,
{
    let scope = Arc::new(RunScope::new(parent, options.timeout));
    let tracker = plan(&config, &options);
    let view = BootstrapView::new(
        config.cluster.name.clone(),
        options.config_source.clone(),
        plan(&config, &options),
        scope.deadline(),
    );

    let (sender, receiver) = mpsc::channel(EVENT_CHANNEL_DEPTH);
    let deps = Deps {
        cluster,
        charts,
        providers,
        diagnostics,
        diag_sink: EventDiagnostics::new(sender.clone()),
    };
    let sink = ChannelSink::new(sender);

    let extend_increment = options.extend_increment;
    let worker = tokio::spawn(execute(scope.clone(), config, options, deps, sink, tracker));
    let watchdog = tokio::spawn(deadline_watchdog(scope.clone()));

    let render = tui::run(scope.clone(), extend_increment, view, receiver).await;
    if render.is_err() {
        // Terminal failure; stop the worker rather than run headless.
        scope.cancel(CancelReason::UserQuit);
    }

    let outcome = worker.await.context("bootstrap worker panicked")?;
    scope.cancel(CancelReason::WorkerDone);
    let _ = watchdog.await;
    render?;
    Ok(outcome)
}

/// Bootstrap with line output, for pipes and CI. Ctrl-C and SIGTERM cancel
/// the run; there is no timeout extension in this mode.
pub async fn run_plain<C, H, P, D>(
    parent: &CancellationToken,
    config: Config,
    options: RunOptions,
    cluster: C,
    charts: H,
    providers: P,
    diagnostics: D,
) -> Result<RunOutcome>
where
    C: ClusterLifecycle + Send + Sync,
    H: ChartInstaller + Send + Sync,
    P: ProviderInstaller + Send + Sync,
    D: DiagnosticsSource + Send + Sync,
{
    let scope = Arc::new(RunScope::new(parent, options.timeout));
    let tracker = plan(&config, &options);
    let sink = PlainSink::stdout(plan(&config, &options));
    let deps = Deps {
        cluster,
        charts,
        providers,
        diagnostics,
        diag_sink: StderrDiagnostics,
    };

    let signal_task = tokio::spawn({
        let scope = scope.clone();
        async move {
            tokio::select! {
                _ = scope.cancelled() => {}
                _ = shutdown_signal() => {
                    info!("interrupt received, stopping bootstrap");
                    scope.cancel(CancelReason::UserQuit);
                }
            }
        }
    });
    let watchdog = tokio::spawn(deadline_watchdog(scope.clone()));

    let outcome = execute(scope.clone(), config, options, deps, sink, tracker).await;

    scope.cancel(CancelReason::WorkerDone);
    let _ = watchdog.await;
    let _ = signal_task.await;
    Ok(outcome)
}

/// Cancel the scope when the deadline passes. Extensions move the deadline,
/// so sleep again whenever it moved while waiting.
pub(crate) async fn deadline_watchdog(scope: Arc<RunScope>) {
    loop {
        let deadline = scope.deadline();
        tokio::select! {
            _ = scope.cancelled() => return,
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                if scope.deadline() <= deadline {
                    scope.cancel(CancelReason::TimedOut);
                    return;
                }
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut signal) = signal::unix::signal(signal::unix::SignalKind::terminate()) {
            signal.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
