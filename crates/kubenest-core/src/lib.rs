//! Shared types for the kubenest bootstrap orchestrator.

pub mod cancel;
pub mod config;
pub mod diag;
pub mod events;
pub mod phase;
pub mod poll;
pub mod util;

pub use cancel::{CancelReason, RunScope};
pub use config::*;
pub use diag::*;
pub use events::*;
pub use phase::{Phase, PhaseStatus, PhaseTracker};
pub use poll::{poll_until_ready, PollError, Probe};
