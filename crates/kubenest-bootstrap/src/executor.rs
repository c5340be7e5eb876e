//! Bootstrap executor: drives the ordered phase sequence.
//!
//! The executor owns the authoritative phase tracker and is the only place
//! that decides fatal-vs-recoverable. Renderers keep their own copies of
//! phase state by consuming the events this module emits.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::info;

use kubenest_core::util::format_duration;
use kubenest_core::{
    poll_until_ready, CancelReason, ChartSpec, Checkpoint, Config, PhaseTracker, PodSummary,
    PollError, Probe, ProgressEvent, RunOutcome, RunScope,
};

use crate::diagnostics::{
    collect, DiagnosticsContext, DiagnosticsSink, DiagnosticsSource, DEFAULT_MAX_LOG_LINES,
};
use crate::providers::{ChartInstallOptions, ChartInstaller, ClusterLifecycle, ProviderInstaller};
use crate::sink::ProgressSink;

pub const PHASE_CLUSTER: &str = "create cluster";
pub const PHASE_REGISTRY: &str = "configure local registry";
pub const PHASE_TRUSTED_CA: &str = "configure trusted CAs";
pub const PHASE_PRELOAD: &str = "preload images";
pub const PHASE_CONTROL_PLANE: &str = "install control plane";
pub const PHASE_PROVIDERS: &str = "install providers";
pub const PHASE_RESOURCES: &str = "apply custom resources";

/// Helm release name used for the control-plane operator install.
pub const CONTROL_PLANE_RELEASE: &str = "kubenest-control-plane";

pub fn chart_phase(checkpoint: Checkpoint) -> String {
    format!("install {} charts", checkpoint.label())
}

/// Stage groups the operator can skip wholesale.
#[derive(Clone, Debug, Default)]
pub struct Skips {
    pub charts: bool,
    pub control_plane: bool,
    pub providers: bool,
    pub resources: bool,
}

#[derive(Clone, Debug)]
pub struct RunOptions {
    pub timeout: Duration,
    pub extend_increment: Duration,
    pub rollback: bool,
    pub next_steps: Option<String>,
    /// Value overrides merged into every chart install.
    pub values_overlay: BTreeMap<String, String>,
    pub skips: Skips,
    pub poll_interval: Duration,
    /// Where the configuration came from, for the renderer header.
    pub config_source: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            extend_increment: Duration::from_secs(300),
            rollback: false,
            next_steps: None,
            values_overlay: BTreeMap::new(),
            skips: Skips::default(),
            poll_interval: Duration::from_secs(5),
            config_source: "default".to_string(),
        }
    }
}

/// Collaborators the executor drives. Generic so tests can substitute
/// scripted fakes without any I/O.
pub struct Deps<C, H, P, D, K> {
    pub cluster: C,
    pub charts: H,
    pub providers: P,
    pub diagnostics: D,
    pub diag_sink: K,
}

/// Build the phase plan the run will execute. The displayed plan must match
/// what configuration actually requires, so inclusion happens here, once.
pub fn plan(config: &Config, options: &RunOptions) -> PhaseTracker {
    let mut tracker = PhaseTracker::new();
    tracker.add(PHASE_CLUSTER);
    tracker.add_if(config.registry.enabled, PHASE_REGISTRY);
    tracker.add_if(!config.cluster.trusted_ca.is_empty(), PHASE_TRUSTED_CA);
    tracker.add_if(!config.cluster.preload_images.is_empty(), PHASE_PRELOAD);

    let charts_at = |checkpoint: Checkpoint| {
        !options.skips.charts && !config.charts_at(checkpoint).is_empty()
    };
    tracker.add_if(
        charts_at(Checkpoint::PreControlPlane),
        &chart_phase(Checkpoint::PreControlPlane),
    );
    tracker.add_if(
        config.control_plane.enabled && !options.skips.control_plane,
        PHASE_CONTROL_PLANE,
    );
    tracker.add_if(
        charts_at(Checkpoint::PostControlPlane),
        &chart_phase(Checkpoint::PostControlPlane),
    );
    tracker.add_if(
        !config.providers.is_empty() && !options.skips.providers,
        PHASE_PROVIDERS,
    );
    tracker.add_if(
        charts_at(Checkpoint::PostDependencyInstall),
        &chart_phase(Checkpoint::PostDependencyInstall),
    );
    tracker.add_if(
        !config.resources.is_empty() && !options.skips.resources,
        PHASE_RESOURCES,
    );
    tracker.add_if(charts_at(Checkpoint::Final), &chart_phase(Checkpoint::Final));
    tracker
}

enum StepError {
    Interrupted,
    Failed(anyhow::Error),
}

enum RunError {
    Interrupted,
    Stage { phase: String, error: String },
}

/// Await a collaborator call, surfacing scope cancellation within the call.
async fn guarded<T>(
    scope: &RunScope,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T, StepError> {
    tokio::select! {
        _ = scope.cancelled() => Err(StepError::Interrupted),
        result = fut => result.map_err(StepError::Failed),
    }
}

/// Run the whole bootstrap. Always emits a terminal RunCompleted event and
/// returns the same outcome.
pub async fn execute<C, H, P, D, K, S>(
    scope: Arc<RunScope>,
    config: Config,
    options: RunOptions,
    deps: Deps<C, H, P, D, K>,
    sink: S,
    mut tracker: PhaseTracker,
) -> RunOutcome
where
    C: ClusterLifecycle,
    H: ChartInstaller,
    P: ProviderInstaller,
    D: DiagnosticsSource,
    K: DiagnosticsSink,
    S: ProgressSink,
{
    let started = Instant::now();
    let mut created = false;
    let result = run_phases(
        &scope,
        &config,
        &options,
        &deps,
        &sink,
        &mut tracker,
        &mut created,
    )
    .await;

    let outcome = match result {
        Ok(()) => {
            info!(cluster = %config.cluster.name, "bootstrap complete");
            RunOutcome::success(
                format!(
                    "cluster {} ready in {}",
                    config.cluster.name,
                    format_duration(started.elapsed())
                ),
                options.next_steps.clone(),
            )
        }
        Err(RunError::Interrupted) => match scope.reason() {
            Some(CancelReason::TimedOut) => RunOutcome::failure(
                format!(
                    "bootstrap timed out after {}",
                    format_duration(started.elapsed())
                ),
                None,
            ),
            _ => RunOutcome::failure("bootstrap cancelled by user", None),
        },
        Err(RunError::Stage { phase, error }) => {
            if options.rollback && created {
                sink.emit(ProgressEvent::LogLine(format!(
                    "rolling back: deleting cluster {}",
                    config.cluster.name
                )))
                .await;
                if let Err(err) = deps.cluster.delete(&config.cluster.name).await {
                    // Best effort; never masks the original failure.
                    sink.emit(ProgressEvent::LogLine(format!("rollback failed: {err:#}")))
                        .await;
                }
            }
            RunOutcome::failure(format!("phase \"{phase}\" failed"), Some(error))
        }
    };

    sink.emit(ProgressEvent::RunCompleted(outcome.clone())).await;
    outcome
}

#[allow(clippy::too_many_arguments)]
async fn run_phases<C, H, P, D, K, S>(
    scope: &RunScope,
    config: &Config,
    options: &RunOptions,
    deps: &Deps<C, H, P, D, K>,
    sink: &S,
    tracker: &mut PhaseTracker,
    created: &mut bool,
) -> Result<(), RunError>
where
    C: ClusterLifecycle,
    H: ChartInstaller,
    P: ProviderInstaller,
    D: DiagnosticsSource,
    K: DiagnosticsSink,
    S: ProgressSink,
{
    let name = config.cluster.name.clone();
    let operation = |line: &str| {
        sink.emit_now(ProgressEvent::Operation {
            step: line.to_string(),
            ratio: None,
        })
    };

    // Cluster creation, or a skip when it already exists.
    let exists = match guarded(scope, deps.cluster.exists(&name)).await {
        Ok(exists) => exists,
        Err(step) => {
            phase_start(tracker, sink, PHASE_CLUSTER).await;
            return Err(step_failure(
                deps,
                sink,
                tracker,
                PHASE_CLUSTER,
                cluster_ctx(),
                step,
            )
            .await);
        }
    };
    if exists {
        phase_skip(tracker, sink, PHASE_CLUSTER, "cluster already exists").await;
    } else {
        phase_start(tracker, sink, PHASE_CLUSTER).await;
        if let Err(step) = guarded(scope, deps.cluster.create(config, &operation)).await {
            return Err(
                step_failure(deps, sink, tracker, PHASE_CLUSTER, cluster_ctx(), step).await,
            );
        }
        *created = true;

        // Wait for the control plane to come up before anything installs.
        let poll = poll_until_ready(scope, options.poll_interval, || {
            control_plane_probe(deps, sink, &name)
        })
        .await;
        match poll {
            Ok(pods) => {
                phase_done(
                    tracker,
                    sink,
                    PHASE_CLUSTER,
                    Some(format!("{} control-plane pod(s) ready", pods.len())),
                )
                .await;
            }
            Err(PollError::Cancelled) => return Err(RunError::Interrupted),
            Err(PollError::Fatal(err)) => {
                return Err(step_failure(
                    deps,
                    sink,
                    tracker,
                    PHASE_CLUSTER,
                    cluster_ctx(),
                    StepError::Failed(err),
                )
                .await);
            }
        }
    }

    if config.registry.enabled {
        phase_start(tracker, sink, PHASE_REGISTRY).await;
        match guarded(
            scope,
            deps.cluster
                .setup_registry(&name, config.registry.port, &operation),
        )
        .await
        {
            Ok(()) => {
                phase_done(
                    tracker,
                    sink,
                    PHASE_REGISTRY,
                    Some(format!("registry listening on 127.0.0.1:{}", config.registry.port)),
                )
                .await;
            }
            Err(step) => {
                return Err(step_failure(
                    deps,
                    sink,
                    tracker,
                    PHASE_REGISTRY,
                    component_only_ctx("local registry"),
                    step,
                )
                .await);
            }
        }
    }

    if !config.cluster.trusted_ca.is_empty() {
        phase_start(tracker, sink, PHASE_TRUSTED_CA).await;
        match guarded(
            scope,
            deps.cluster
                .trust_cas(&name, &config.cluster.trusted_ca, &operation),
        )
        .await
        {
            Ok(()) => {
                phase_done(
                    tracker,
                    sink,
                    PHASE_TRUSTED_CA,
                    Some(format!("{} certificate(s) trusted", config.cluster.trusted_ca.len())),
                )
                .await;
            }
            Err(step) => {
                return Err(step_failure(
                    deps,
                    sink,
                    tracker,
                    PHASE_TRUSTED_CA,
                    component_only_ctx("trusted CAs"),
                    step,
                )
                .await);
            }
        }
    }

    if !config.cluster.preload_images.is_empty() {
        phase_start(tracker, sink, PHASE_PRELOAD).await;
        match guarded(
            scope,
            deps.cluster
                .load_images(&name, &config.cluster.preload_images, &operation),
        )
        .await
        {
            Ok(()) => {
                phase_done(
                    tracker,
                    sink,
                    PHASE_PRELOAD,
                    Some(format!("{} image(s) loaded", config.cluster.preload_images.len())),
                )
                .await;
            }
            Err(step) => {
                return Err(step_failure(
                    deps,
                    sink,
                    tracker,
                    PHASE_PRELOAD,
                    component_only_ctx("image preload"),
                    step,
                )
                .await);
            }
        }
    }

    install_checkpoint(
        scope, config, options, deps, sink, tracker,
        Checkpoint::PreControlPlane,
    )
    .await?;

    if config.control_plane.enabled && !options.skips.control_plane {
        phase_start(tracker, sink, PHASE_CONTROL_PLANE).await;
        let spec = control_plane_chart(config);
        if let Err(step) = install_chart(scope, options, deps, sink, &spec).await {
            return Err(step_failure(
                deps,
                sink,
                tracker,
                PHASE_CONTROL_PLANE,
                control_plane_ctx(config),
                step,
            )
            .await);
        }
        phase_done(tracker, sink, PHASE_CONTROL_PLANE, None).await;
    }

    install_checkpoint(
        scope, config, options, deps, sink, tracker,
        Checkpoint::PostControlPlane,
    )
    .await?;

    if !config.providers.is_empty() && !options.skips.providers {
        phase_start(tracker, sink, PHASE_PROVIDERS).await;
        for provider in &config.providers {
            if let Err(step) = guarded(
                scope,
                deps.providers
                    .install(&provider.name, &provider.package, &operation),
            )
            .await
            {
                return Err(step_failure(
                    deps,
                    sink,
                    tracker,
                    PHASE_PROVIDERS,
                    providers_ctx(config),
                    step,
                )
                .await);
            }
        }

        // Providers report healthy asynchronously; wait for all of them.
        let poll =
            poll_until_ready(scope, options.poll_interval, || provider_probe(config, deps, sink))
                .await;
        match poll {
            Ok(healthy) => {
                phase_done(
                    tracker,
                    sink,
                    PHASE_PROVIDERS,
                    Some(format!("{healthy} provider(s) healthy")),
                )
                .await;
            }
            Err(PollError::Cancelled) => return Err(RunError::Interrupted),
            Err(PollError::Fatal(err)) => {
                return Err(step_failure(
                    deps,
                    sink,
                    tracker,
                    PHASE_PROVIDERS,
                    providers_ctx(config),
                    StepError::Failed(err),
                )
                .await);
            }
        }
    }

    install_checkpoint(
        scope, config, options, deps, sink, tracker,
        Checkpoint::PostDependencyInstall,
    )
    .await?;

    if !config.resources.is_empty() && !options.skips.resources {
        phase_start(tracker, sink, PHASE_RESOURCES).await;
        match guarded(
            scope,
            deps.cluster.apply_manifests(&config.resources, &operation),
        )
        .await
        {
            Ok(count) => {
                phase_done(
                    tracker,
                    sink,
                    PHASE_RESOURCES,
                    Some(format!("{count} manifest(s) applied")),
                )
                .await;
            }
            Err(step) => {
                return Err(step_failure(
                    deps,
                    sink,
                    tracker,
                    PHASE_RESOURCES,
                    component_only_ctx("custom resources"),
                    step,
                )
                .await);
            }
        }
    }

    install_checkpoint(scope, config, options, deps, sink, tracker, Checkpoint::Final).await?;

    Ok(())
}

async fn control_plane_probe<C, H, P, D, K, S>(
    deps: &Deps<C, H, P, D, K>,
    sink: &S,
    name: &str,
) -> Result<Probe<Vec<PodSummary>>, anyhow::Error>
where
    C: ClusterLifecycle,
    S: ProgressSink,
{
    match deps.cluster.control_plane_pods(name).await {
        Ok(pods) => {
            sink.emit_now(ProgressEvent::PodSnapshot(pods.clone()));
            if !pods.is_empty() && pods.iter().all(PodSummary::is_ready) {
                Ok(Probe::Ready(pods))
            } else {
                Ok(Probe::Pending(Some(pods)))
            }
        }
        // The API server flaps while the cluster settles; keep polling.
        Err(err) => Ok(Probe::Transient(format!("{err:#}"))),
    }
}

async fn provider_probe<C, H, P, D, K, S>(
    config: &Config,
    deps: &Deps<C, H, P, D, K>,
    sink: &S,
) -> Result<Probe<usize>, anyhow::Error>
where
    P: ProviderInstaller,
    S: ProgressSink,
{
    match deps.providers.status().await {
        Ok(statuses) => {
            let expected = config.providers.len();
            let healthy = statuses.iter().filter(|status| status.healthy).count();
            sink.emit_now(ProgressEvent::Operation {
                step: format!("waiting for providers: {healthy}/{expected} healthy"),
                ratio: Some(healthy as f64 / expected.max(1) as f64),
            });
            let all_healthy = config.providers.iter().all(|provider| {
                statuses
                    .iter()
                    .any(|status| status.name == provider.name && status.healthy)
            });
            if all_healthy {
                Ok(Probe::Ready(healthy))
            } else {
                Ok(Probe::Pending(None))
            }
        }
        Err(err) => Ok(Probe::Transient(format!("{err:#}"))),
    }
}

async fn install_checkpoint<C, H, P, D, K, S>(
    scope: &RunScope,
    config: &Config,
    options: &RunOptions,
    deps: &Deps<C, H, P, D, K>,
    sink: &S,
    tracker: &mut PhaseTracker,
    checkpoint: Checkpoint,
) -> Result<(), RunError>
where
    C: ClusterLifecycle,
    H: ChartInstaller,
    P: ProviderInstaller,
    D: DiagnosticsSource,
    K: DiagnosticsSink,
    S: ProgressSink,
{
    if options.skips.charts {
        return Ok(());
    }
    let charts: Vec<ChartSpec> = config
        .charts_at(checkpoint)
        .into_iter()
        .cloned()
        .collect();
    if charts.is_empty() {
        return Ok(());
    }

    let phase = chart_phase(checkpoint);
    phase_start(tracker, sink, &phase).await;
    let total = charts.len();
    for (index, chart) in charts.iter().enumerate() {
        sink.emit(ProgressEvent::Operation {
            step: format!("installing chart {}", chart.name),
            ratio: Some(index as f64 / total as f64),
        })
        .await;
        if let Err(step) = install_chart(scope, options, deps, sink, chart).await {
            return Err(step_failure(
                deps,
                sink,
                tracker,
                &phase,
                chart_ctx(checkpoint, chart),
                step,
            )
            .await);
        }
    }
    phase_done(
        tracker,
        sink,
        &phase,
        Some(format!("{total} chart(s) installed")),
    )
    .await;
    Ok(())
}

async fn install_chart<C, H, P, D, K, S>(
    scope: &RunScope,
    options: &RunOptions,
    deps: &Deps<C, H, P, D, K>,
    sink: &S,
    chart: &ChartSpec,
) -> Result<(), StepError>
where
    H: ChartInstaller,
    S: ProgressSink,
{
    let overlay = options.values_overlay.clone();
    let transform = move |mut values: BTreeMap<String, String>| {
        values.extend(overlay.clone());
        values
    };
    let log = |line: &str| sink.emit_now(ProgressEvent::LogLine(line.to_string()));
    guarded(
        scope,
        deps.charts.install(
            chart,
            ChartInstallOptions {
                values_transform: Some(&transform),
                log: &log,
            },
        ),
    )
    .await
}

fn control_plane_chart(config: &Config) -> ChartSpec {
    ChartSpec {
        name: CONTROL_PLANE_RELEASE.to_string(),
        repo: None,
        chart: config.control_plane.chart.clone(),
        version: config.control_plane.version.clone(),
        namespace: config.control_plane.namespace.clone(),
        values: BTreeMap::new(),
        checkpoint: Checkpoint::PreControlPlane,
    }
}

fn cluster_ctx() -> DiagnosticsContext {
    DiagnosticsContext {
        component: "cluster".to_string(),
        namespace: Some("kube-system".to_string()),
        release: None,
        selector: None,
        max_log_lines: DEFAULT_MAX_LOG_LINES,
        include_providers: false,
    }
}

fn component_only_ctx(component: &str) -> DiagnosticsContext {
    DiagnosticsContext {
        component: component.to_string(),
        namespace: None,
        release: None,
        selector: None,
        max_log_lines: DEFAULT_MAX_LOG_LINES,
        include_providers: false,
    }
}

fn control_plane_ctx(config: &Config) -> DiagnosticsContext {
    DiagnosticsContext {
        component: "control plane".to_string(),
        namespace: Some(config.control_plane.namespace.clone()),
        release: Some(CONTROL_PLANE_RELEASE.to_string()),
        selector: None,
        max_log_lines: DEFAULT_MAX_LOG_LINES,
        include_providers: true,
    }
}

fn providers_ctx(config: &Config) -> DiagnosticsContext {
    DiagnosticsContext {
        component: "providers".to_string(),
        namespace: Some(config.control_plane.namespace.clone()),
        release: None,
        selector: None,
        max_log_lines: DEFAULT_MAX_LOG_LINES,
        include_providers: true,
    }
}

fn chart_ctx(checkpoint: Checkpoint, chart: &ChartSpec) -> DiagnosticsContext {
    DiagnosticsContext {
        component: format!("{} charts", checkpoint.label()),
        namespace: Some(chart.namespace.clone()),
        release: Some(chart.name.clone()),
        selector: None,
        max_log_lines: DEFAULT_MAX_LOG_LINES,
        include_providers: false,
    }
}

async fn phase_start<S: ProgressSink>(tracker: &mut PhaseTracker, sink: &S, name: &str) {
    tracker.mark_running(name);
    sink.emit(ProgressEvent::PhaseStarted {
        name: name.to_string(),
    })
    .await;
}

async fn phase_done<S: ProgressSink>(
    tracker: &mut PhaseTracker,
    sink: &S,
    name: &str,
    message: Option<String>,
) {
    match &message {
        Some(message) => tracker.mark_complete_with(message),
        None => tracker.mark_complete(),
    };
    sink.emit(ProgressEvent::PhaseCompleted {
        name: name.to_string(),
        message,
    })
    .await;
}

async fn phase_skip<S: ProgressSink>(
    tracker: &mut PhaseTracker,
    sink: &S,
    name: &str,
    reason: &str,
) {
    tracker.mark_skipped(name, reason);
    sink.emit(ProgressEvent::PhaseSkipped {
        name: name.to_string(),
        reason: reason.to_string(),
    })
    .await;
}

/// Map a step failure to its run error. Cancellation passes through
/// untouched; stage failures mark the phase, collect diagnostics scoped to
/// the failing component, and render them through the diagnostics sink.
async fn step_failure<C, H, P, D, K, S>(
    deps: &Deps<C, H, P, D, K>,
    sink: &S,
    tracker: &mut PhaseTracker,
    phase: &str,
    ctx: DiagnosticsContext,
    step: StepError,
) -> RunError
where
    D: DiagnosticsSource,
    K: DiagnosticsSink,
    S: ProgressSink,
{
    match step {
        StepError::Interrupted => RunError::Interrupted,
        StepError::Failed(err) => {
            let error = format!("{err:#}");
            tracker.mark_failed(&error);
            sink.emit(ProgressEvent::PhaseFailed {
                name: phase.to_string(),
                error: error.clone(),
            })
            .await;
            let report = collect(&deps.diagnostics, &ctx).await;
            deps.diag_sink.render(&report);
            RunError::Stage {
                phase: phase.to_string(),
                error,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::deadline_watchdog;
    use anyhow::{anyhow, Result};
    use kubenest_core::{
        DiagnosticsReport, PodDiagnostic, ProviderDiagnostic, ProviderSpec, ReleaseDiagnostic,
    };
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    use crate::providers::{ProgressFn, ProviderStatus};

    #[derive(Default)]
    struct FakeCluster {
        exists: bool,
        fail_create: bool,
        hang_create: bool,
        deleted: Mutex<Vec<String>>,
    }

    impl ClusterLifecycle for &FakeCluster {
        async fn exists(&self, _name: &str) -> Result<bool> {
            Ok(self.exists)
        }

        async fn create(&self, _config: &Config, progress: ProgressFn<'_>) -> Result<()> {
            if self.hang_create {
                std::future::pending::<()>().await;
            }
            if self.fail_create {
                return Err(anyhow!("node image pull failed"));
            }
            progress("pulling node image");
            Ok(())
        }

        async fn delete(&self, name: &str) -> Result<()> {
            self.deleted.lock().unwrap().push(name.to_string());
            Ok(())
        }

        async fn control_plane_pods(&self, _name: &str) -> Result<Vec<PodSummary>> {
            Ok(vec![PodSummary {
                name: "kube-apiserver".into(),
                namespace: "kube-system".into(),
                phase: "Running".into(),
                ready_containers: 1,
                total_containers: 1,
            }])
        }

        async fn setup_registry(
            &self,
            _name: &str,
            _port: u16,
            _progress: ProgressFn<'_>,
        ) -> Result<()> {
            Ok(())
        }

        async fn trust_cas(
            &self,
            _name: &str,
            _certs: &[PathBuf],
            _progress: ProgressFn<'_>,
        ) -> Result<()> {
            Ok(())
        }

        async fn load_images(
            &self,
            _name: &str,
            _images: &[String],
            _progress: ProgressFn<'_>,
        ) -> Result<()> {
            Ok(())
        }

        async fn apply_manifests(
            &self,
            paths: &[PathBuf],
            _progress: ProgressFn<'_>,
        ) -> Result<usize> {
            Ok(paths.len())
        }
    }

    #[derive(Default)]
    struct FakeCharts {
        fail_release: Option<String>,
        installed: Mutex<Vec<String>>,
    }

    impl ChartInstaller for &FakeCharts {
        async fn install(
            &self,
            spec: &ChartSpec,
            options: ChartInstallOptions<'_>,
        ) -> Result<()> {
            if self.fail_release.as_deref() == Some(spec.name.as_str()) {
                return Err(anyhow!("release {} failed", spec.name));
            }
            let values = match options.values_transform {
                Some(transform) => transform(spec.values.clone()),
                None => spec.values.clone(),
            };
            (options.log)(&format!("installed {} ({} values)", spec.name, values.len()));
            self.installed.lock().unwrap().push(spec.name.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeProviders {
        healthy: AtomicBool,
        installed: Mutex<Vec<String>>,
    }

    impl ProviderInstaller for &FakeProviders {
        async fn install(
            &self,
            name: &str,
            _package: &str,
            _progress: ProgressFn<'_>,
        ) -> Result<()> {
            self.installed.lock().unwrap().push(name.to_string());
            // Providers report healthy on the status poll after install.
            self.healthy.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn status(&self) -> Result<Vec<ProviderStatus>> {
            let healthy = self.healthy.load(Ordering::SeqCst);
            Ok(self
                .installed
                .lock()
                .unwrap()
                .iter()
                .map(|name| ProviderStatus {
                    name: name.clone(),
                    package: format!("registry.example.com/{name}:v1"),
                    healthy,
                    condition: "Healthy".into(),
                    reason: None,
                    message: None,
                })
                .collect())
        }
    }

    struct NullDiagnostics;

    impl DiagnosticsSource for &NullDiagnostics {
        async fn pods(
            &self,
            _namespace: &str,
            _selector: Option<&str>,
            _max_log_lines: usize,
        ) -> Result<Vec<PodDiagnostic>> {
            Ok(Vec::new())
        }

        async fn providers(&self) -> Result<Vec<ProviderDiagnostic>> {
            Ok(Vec::new())
        }

        async fn release(&self, namespace: &str, name: &str) -> Result<ReleaseDiagnostic> {
            Ok(ReleaseDiagnostic {
                name: name.to_string(),
                namespace: namespace.to_string(),
                status: "failed".into(),
                error: None,
            })
        }
    }

    #[derive(Default)]
    struct RecordingDiagSink {
        components: Mutex<Vec<String>>,
    }

    impl DiagnosticsSink for &RecordingDiagSink {
        fn render(&self, report: &DiagnosticsReport) {
            self.components.lock().unwrap().push(report.component.clone());
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<ProgressEvent>>,
    }

    impl RecordingSink {
        fn phase_events(&self) -> Vec<String> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|event| match event {
                    ProgressEvent::PhaseStarted { name } => Some(format!("start {name}")),
                    ProgressEvent::PhaseCompleted { name, .. } => Some(format!("done {name}")),
                    ProgressEvent::PhaseSkipped { name, .. } => Some(format!("skip {name}")),
                    ProgressEvent::PhaseFailed { name, .. } => Some(format!("fail {name}")),
                    _ => None,
                })
                .collect()
        }
    }

    impl ProgressSink for &RecordingSink {
        async fn emit(&self, event: ProgressEvent) {
            self.events.lock().unwrap().push(event);
        }

        fn emit_now(&self, event: ProgressEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn base_config() -> Config {
        let mut config = Config::default();
        config.cluster.name = "testnest".into();
        config.providers = vec![ProviderSpec {
            name: "provider-dns".into(),
            package: "registry.example.com/provider-dns:v1".into(),
        }];
        config
    }

    fn options() -> RunOptions {
        RunOptions {
            poll_interval: Duration::from_millis(10),
            ..RunOptions::default()
        }
    }

    fn scope(timeout: Duration) -> Arc<RunScope> {
        Arc::new(RunScope::new(&CancellationToken::new(), timeout))
    }

    struct Fixture {
        cluster: FakeCluster,
        charts: FakeCharts,
        providers: FakeProviders,
        diagnostics: NullDiagnostics,
        diag_sink: RecordingDiagSink,
        sink: RecordingSink,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                cluster: FakeCluster::default(),
                charts: FakeCharts::default(),
                providers: FakeProviders::default(),
                diagnostics: NullDiagnostics,
                diag_sink: RecordingDiagSink::default(),
                sink: RecordingSink::default(),
            }
        }

        async fn run(&self, config: Config, options: RunOptions, timeout: Duration) -> RunOutcome {
            let scope = scope(timeout);
            let tracker = plan(&config, &options);
            execute(
                scope,
                config,
                options,
                Deps {
                    cluster: &self.cluster,
                    charts: &self.charts,
                    providers: &self.providers,
                    diagnostics: &self.diagnostics,
                    diag_sink: &self.diag_sink,
                },
                &self.sink,
                tracker,
            )
            .await
        }
    }

    #[test]
    fn plan_includes_only_configured_phases() {
        let mut config = base_config();
        config.registry.enabled = true;
        config.providers.clear();
        let tracker = plan(&config, &options());
        let names: Vec<&str> = tracker
            .phases()
            .iter()
            .map(|phase| phase.name.as_str())
            .collect();
        assert_eq!(names, [PHASE_CLUSTER, PHASE_REGISTRY, PHASE_CONTROL_PLANE]);
    }

    #[test]
    fn plan_honors_skip_flags() {
        let mut config = base_config();
        config.resources = vec![PathBuf::from("claims.yaml")];
        let mut opts = options();
        opts.skips.providers = true;
        opts.skips.resources = true;
        let tracker = plan(&config, &opts);
        assert!(!tracker
            .phases()
            .iter()
            .any(|phase| phase.name == PHASE_PROVIDERS || phase.name == PHASE_RESOURCES));
    }

    #[tokio::test]
    async fn happy_path_completes_every_phase() {
        let fixture = Fixture::new();
        let outcome = fixture
            .run(base_config(), options(), Duration::from_secs(60))
            .await;
        assert!(outcome.success, "outcome: {outcome:?}");
        assert_eq!(
            fixture.sink.phase_events(),
            vec![
                format!("start {PHASE_CLUSTER}"),
                format!("done {PHASE_CLUSTER}"),
                format!("start {PHASE_CONTROL_PLANE}"),
                format!("done {PHASE_CONTROL_PLANE}"),
                format!("start {PHASE_PROVIDERS}"),
                format!("done {PHASE_PROVIDERS}"),
            ]
        );
        assert!(fixture.diag_sink.components.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn existing_cluster_is_skipped_not_failed() {
        let mut fixture = Fixture::new();
        fixture.cluster.exists = true;
        let outcome = fixture
            .run(base_config(), options(), Duration::from_secs(60))
            .await;
        assert!(outcome.success);
        assert_eq!(
            fixture.sink.phase_events()[0],
            format!("skip {PHASE_CLUSTER}")
        );
    }

    #[tokio::test]
    async fn middle_phase_failure_leaves_later_phases_pending() {
        // Phases [cluster, control plane, providers]; control plane fails.
        let mut fixture = Fixture::new();
        fixture.charts.fail_release = Some(CONTROL_PLANE_RELEASE.into());
        let outcome = fixture
            .run(base_config(), options(), Duration::from_secs(60))
            .await;

        assert!(!outcome.success);
        assert!(outcome.message.contains(PHASE_CONTROL_PLANE));
        assert!(outcome.error.as_deref().unwrap().contains("failed"));
        let events = fixture.sink.phase_events();
        assert_eq!(
            events,
            vec![
                format!("start {PHASE_CLUSTER}"),
                format!("done {PHASE_CLUSTER}"),
                format!("start {PHASE_CONTROL_PLANE}"),
                format!("fail {PHASE_CONTROL_PLANE}"),
            ]
        );
        // Diagnostics were collected scoped to the failing component.
        assert_eq!(
            *fixture.diag_sink.components.lock().unwrap(),
            vec!["control plane".to_string()]
        );
        // Providers never ran.
        assert!(fixture.providers.installed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rollback_deletes_a_cluster_created_this_run() {
        let mut fixture = Fixture::new();
        fixture.charts.fail_release = Some(CONTROL_PLANE_RELEASE.into());
        let mut opts = options();
        opts.rollback = true;
        let outcome = fixture
            .run(base_config(), opts, Duration::from_secs(60))
            .await;
        assert!(!outcome.success);
        assert_eq!(
            *fixture.cluster.deleted.lock().unwrap(),
            vec!["testnest".to_string()]
        );
    }

    #[tokio::test]
    async fn rollback_never_touches_a_preexisting_cluster() {
        let mut fixture = Fixture::new();
        fixture.cluster.exists = true;
        fixture.charts.fail_release = Some(CONTROL_PLANE_RELEASE.into());
        let mut opts = options();
        opts.rollback = true;
        let outcome = fixture
            .run(base_config(), opts, Duration::from_secs(60))
            .await;
        assert!(!outcome.success);
        assert!(fixture.cluster.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rollback_requires_the_flag() {
        let mut fixture = Fixture::new();
        fixture.charts.fail_release = Some(CONTROL_PLANE_RELEASE.into());
        let outcome = fixture
            .run(base_config(), options(), Duration::from_secs(60))
            .await;
        assert!(!outcome.success);
        assert!(fixture.cluster.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_cancels_the_worker_once_and_reports_timeout() {
        let mut fixture = Fixture::new();
        fixture.cluster.hang_create = true;
        let config = base_config();
        let opts = options();
        let scope = scope(Duration::from_secs(1));
        let tracker = plan(&config, &opts);

        let watchdog = tokio::spawn({
            let scope = scope.clone();
            async move { deadline_watchdog(scope).await }
        });
        let outcome = execute(
            scope.clone(),
            config,
            opts,
            Deps {
                cluster: &fixture.cluster,
                charts: &fixture.charts,
                providers: &fixture.providers,
                diagnostics: &fixture.diagnostics,
                diag_sink: &fixture.diag_sink,
            },
            &fixture.sink,
            tracker,
        )
        .await;
        watchdog.await.unwrap();

        assert!(!outcome.success);
        assert!(outcome.message.contains("timed out"));
        assert_eq!(scope.reason(), Some(CancelReason::TimedOut));
    }

    #[tokio::test(start_paused = true)]
    async fn user_cancellation_is_not_a_stage_failure() {
        let mut fixture = Fixture::new();
        fixture.cluster.hang_create = true;
        let config = base_config();
        let opts = options();
        let scope = scope(Duration::from_secs(600));
        let tracker = plan(&config, &opts);

        let canceller = scope.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel(CancelReason::UserQuit);
        });
        let outcome = execute(
            scope,
            config,
            opts,
            Deps {
                cluster: &fixture.cluster,
                charts: &fixture.charts,
                providers: &fixture.providers,
                diagnostics: &fixture.diagnostics,
                diag_sink: &fixture.diag_sink,
            },
            &fixture.sink,
            tracker,
        )
        .await;

        assert!(!outcome.success);
        assert!(outcome.message.contains("cancelled"));
        // No diagnostics for a cancelled run.
        assert!(fixture.diag_sink.components.lock().unwrap().is_empty());
        // The running phase was interrupted, never failed.
        assert!(!fixture
            .sink
            .phase_events()
            .iter()
            .any(|event| event.starts_with("fail")));
    }

    #[tokio::test]
    async fn checkpoint_charts_install_in_declared_order() {
        let mut config = base_config();
        config.providers.clear();
        config.charts = vec![
            ChartSpec {
                name: "cert-manager".into(),
                repo: None,
                chart: "jetstack/cert-manager".into(),
                version: None,
                namespace: "cert-manager".into(),
                values: BTreeMap::new(),
                checkpoint: Checkpoint::PreControlPlane,
            },
            ChartSpec {
                name: "ingress".into(),
                repo: None,
                chart: "ingress-nginx/ingress-nginx".into(),
                version: None,
                namespace: "ingress".into(),
                values: BTreeMap::new(),
                checkpoint: Checkpoint::Final,
            },
        ];
        let fixture = Fixture::new();
        let outcome = fixture
            .run(config, options(), Duration::from_secs(60))
            .await;
        assert!(outcome.success);
        assert_eq!(
            *fixture.charts.installed.lock().unwrap(),
            vec![
                "cert-manager".to_string(),
                CONTROL_PLANE_RELEASE.to_string(),
                "ingress".to_string()
            ]
        );
    }
}
