//! Bootstrap orchestration engine for kubenest.
//!
//! Drives the ordered phase sequence against a container-hosted cluster,
//! streaming progress events to either the interactive (ratatui) or the
//! plain renderer, with cooperative cancellation and failure diagnostics.

pub mod diagnostics;
pub mod executor;
pub mod providers;
pub mod runner;
pub mod sink;
pub mod terminal;
pub mod tui;
pub mod view;

pub use executor::{plan, Deps, RunOptions, Skips};
pub use runner::{run_interactive, run_plain};
pub use sink::{ChannelSink, PlainSink, ProgressSink};
