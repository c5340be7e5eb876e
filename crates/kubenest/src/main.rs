//! kubenest entrypoint: bootstrap a local container-hosted cluster.

mod runtime;

use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use kubenest_bootstrap::diagnostics::KubectlDiagnostics;
use kubenest_bootstrap::providers::{HelmInstaller, KindCluster, KubectlProviders};
use kubenest_bootstrap::{run_interactive, run_plain, RunOptions, Skips};
use kubenest_core::RunOutcome;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file; defaults to the user config directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overall run deadline in seconds.
    #[arg(long, default_value_t = 600)]
    timeout_secs: u64,

    /// How much each timeout extension adds, in seconds.
    #[arg(long, default_value_t = 300)]
    extend_secs: u64,

    /// Delete a cluster created by this run if the run fails.
    #[arg(long)]
    rollback: bool,

    /// Line output instead of the full-screen renderer.
    #[arg(long)]
    plain: bool,

    /// Validate the configuration and print the phase plan, without running.
    #[arg(long)]
    check: bool,

    /// Skip all chart installs.
    #[arg(long)]
    skip_charts: bool,

    /// Skip the control-plane install.
    #[arg(long)]
    skip_control_plane: bool,

    /// Skip provider installs.
    #[arg(long)]
    skip_providers: bool,

    /// Skip applying custom resource manifests.
    #[arg(long)]
    skip_resources: bool,

    /// Chart value override, key=value. Repeatable; applies to every chart.
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    values: Vec<(String, String)>,
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got \"{raw}\"")),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let (config, source) = runtime::load_config(&args)?;

    let options = RunOptions {
        timeout: Duration::from_secs(args.timeout_secs),
        extend_increment: Duration::from_secs(args.extend_secs),
        rollback: args.rollback,
        next_steps: Some(format!(
            "kubectl --context kind-{} get pods -A",
            config.cluster.name
        )),
        values_overlay: args.values.iter().cloned().collect::<BTreeMap<_, _>>(),
        skips: Skips {
            charts: args.skip_charts,
            control_plane: args.skip_control_plane,
            providers: args.skip_providers,
            resources: args.skip_resources,
        },
        config_source: source,
        ..RunOptions::default()
    };

    if args.check {
        runtime::init_tracing(&config);
        runtime::print_plan(&config, &options);
        return Ok(ExitCode::SUCCESS);
    }

    // The full-screen renderer owns the terminal; log lines would corrupt
    // it, so tracing output is only enabled for plain runs.
    let interactive = !args.plain && std::io::stdout().is_terminal();
    if !interactive {
        runtime::init_tracing(&config);
    }

    let cluster = KindCluster::new();
    let charts = HelmInstaller::new(&config.cluster.name);
    let providers = KubectlProviders::new(&config.cluster.name);
    let diagnostics = KubectlDiagnostics::new(&config.cluster.name);

    let parent = CancellationToken::new();
    let outcome: RunOutcome = if interactive {
        run_interactive(&parent, config, options, cluster, charts, providers, diagnostics).await?
    } else {
        run_plain(&parent, config, options, cluster, charts, providers, diagnostics).await?
    };

    debug!(success = outcome.success, "run finished");
    if outcome.success {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
