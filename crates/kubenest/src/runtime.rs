//! Configuration loading and tracing setup.
//!
//! Keeps environment handling and logging setup out of the main control flow.

use anyhow::{Context, Result};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use kubenest_bootstrap::plan;
use kubenest_bootstrap::RunOptions;
use kubenest_core::Config;

use super::Args;

/// Load the configuration and report where it came from, for the renderer
/// header and --check output.
pub(super) fn load_config(args: &Args) -> Result<(Config, String)> {
    load_config_traced(args, std::io::stderr)
}

// Parsing can emit deprecation warnings before the global subscriber is
// initialized (interactive runs never initialize one); a scoped stderr
// subscriber keeps them from being dropped.
fn load_config_traced<W>(args: &Args, writer: W) -> Result<(Config, String)>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .finish();
    tracing::subscriber::with_default(subscriber, || match args.config.as_ref() {
        Some(path) => {
            let config = Config::load_from_path(path).context("read config from path")?;
            Ok((config, path.display().to_string()))
        }
        None => {
            let config = Config::load_default().context("read default config")?;
            Ok((config, "default config".to_string()))
        }
    })
}

pub(super) fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            config
                .general
                .log_level
                .clone()
                .unwrap_or_else(|| "info".to_string()),
        )
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Print what a run with this configuration would do.
pub(super) fn print_plan(config: &Config, options: &RunOptions) {
    println!("configuration valid; cluster {}", config.cluster.name);
    println!("planned phases:");
    for phase in plan(config, options).phases() {
        println!("  - {}", phase.name);
    }
    if !config.charts.is_empty() {
        println!("charts:");
        for chart in &config.charts {
            println!(
                "  - {} ({}, {} checkpoint)",
                chart.name,
                chart.chart,
                chart.checkpoint.label()
            );
        }
    }
    if !config.providers.is_empty() {
        println!("providers:");
        for provider in &config.providers {
            println!("  - {} ({})", provider.name, provider.package);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use clap::Parser;

    use kubenest_core::Checkpoint;

    use super::*;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        fn text(&self) -> String {
            let inner = self.0.lock().unwrap();
            String::from_utf8_lossy(&inner).into_owned()
        }
    }

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Ok(mut inner) = self.0.lock() {
                inner.extend_from_slice(buf);
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Capture {
        type Writer = Capture;

        fn make_writer(&'a self) -> Capture {
            self.clone()
        }
    }

    #[test]
    fn deprecated_checkpoint_warning_surfaces_while_loading() {
        let path = std::env::temp_dir().join(format!(
            "kubenest-config-{}-deprecated.toml",
            std::process::id()
        ));
        std::fs::write(
            &path,
            r#"
                [cluster]
                name = "legacy"

                [[charts]]
                name = "external-secrets"
                chart = "external-secrets/external-secrets"
                checkpoint = "post-eso"
            "#,
        )
        .unwrap();

        let args = Args::parse_from(["kubenest", "--config", path.to_str().unwrap()]);
        let capture = Capture::default();
        let (config, source) = load_config_traced(&args, capture.clone()).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(config.charts[0].checkpoint, Checkpoint::Final);
        assert_eq!(source, path.display().to_string());
        let warning = capture.text();
        assert!(
            warning.contains("post-eso"),
            "deprecation warning was dropped: {warning:?}"
        );
    }
}
