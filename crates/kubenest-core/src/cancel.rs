//! Cancellable execution scope shared between worker and renderer.
//!
//! A run derives one child scope from the caller's cancellation token. The
//! worker selects against it at every suspension point; the renderer cancels
//! it on user interrupt or deadline expiry. Cancellation is one-shot and the
//! first recorded reason wins, so "timed out" and "cancelled by user" stay
//! distinguishable in the final outcome.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// Why the scope was cancelled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CancelReason {
    /// Operator pressed quit / Ctrl-C.
    UserQuit,
    /// The run deadline expired before completion.
    TimedOut,
    /// The worker finished (success or fatal error) and released waiters.
    WorkerDone,
}

/// Deadline extension is only offered close to expiry, to avoid accidental
/// extensions long before the timeout matters.
pub const EXTEND_THRESHOLD: Duration = Duration::from_secs(120);

#[derive(Debug)]
pub struct RunScope {
    token: CancellationToken,
    deadline: Mutex<Instant>,
    reason: Mutex<Option<CancelReason>>,
}

impl RunScope {
    /// Derive a child scope with a deadline `timeout` from now.
    pub fn new(parent: &CancellationToken, timeout: Duration) -> Self {
        Self {
            token: parent.child_token(),
            deadline: Mutex::new(Instant::now() + timeout),
            reason: Mutex::new(None),
        }
    }

    /// Trigger cancellation. Idempotent; only the first reason is kept.
    pub fn cancel(&self, reason: CancelReason) {
        if let Ok(mut slot) = self.reason.lock() {
            slot.get_or_insert(reason);
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the scope (or its parent) is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// The recorded reason, if cancellation originated here. A parent-token
    /// cancellation leaves no local reason and reads as a user interrupt.
    pub fn reason(&self) -> Option<CancelReason> {
        self.reason.lock().ok().and_then(|slot| *slot)
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
            .lock()
            .map(|deadline| *deadline)
            .unwrap_or_else(|_| Instant::now())
    }

    /// Time left before the deadline, saturating at zero.
    pub fn remaining(&self) -> Duration {
        self.deadline().saturating_duration_since(Instant::now())
    }

    /// Push the deadline forward by `increment`. Allowed only when the
    /// remaining time is under [`EXTEND_THRESHOLD`] and the scope is still
    /// live; otherwise a no-op returning `None`. Extension has no effect on
    /// an already-cancelled scope.
    pub fn extend(&self, increment: Duration) -> Option<Instant> {
        if self.is_cancelled() {
            return None;
        }
        if self.remaining() >= EXTEND_THRESHOLD {
            return None;
        }
        let mut deadline = self.deadline.lock().ok()?;
        *deadline += increment;
        Some(*deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_idempotent_and_keeps_first_reason() {
        let parent = CancellationToken::new();
        let scope = RunScope::new(&parent, Duration::from_secs(60));
        assert!(!scope.is_cancelled());
        assert!(scope.reason().is_none());

        scope.cancel(CancelReason::TimedOut);
        scope.cancel(CancelReason::UserQuit);
        assert!(scope.is_cancelled());
        assert_eq!(scope.reason(), Some(CancelReason::TimedOut));
    }

    #[test]
    fn parent_cancellation_propagates_without_local_reason() {
        let parent = CancellationToken::new();
        let scope = RunScope::new(&parent, Duration::from_secs(60));
        parent.cancel();
        assert!(scope.is_cancelled());
        assert!(scope.reason().is_none());
    }

    #[test]
    fn extend_is_a_noop_far_from_expiry() {
        let parent = CancellationToken::new();
        // 3 minutes remaining is above the 2 minute threshold.
        let scope = RunScope::new(&parent, Duration::from_secs(180));
        assert!(scope.extend(Duration::from_secs(300)).is_none());
    }

    #[test]
    fn extend_succeeds_close_to_expiry_and_moves_deadline_forward() {
        let parent = CancellationToken::new();
        // 90 seconds remaining is under the threshold.
        let scope = RunScope::new(&parent, Duration::from_secs(90));
        let before = scope.deadline();
        let extended = scope.extend(Duration::from_secs(300));
        assert!(extended.is_some());
        assert_eq!(extended.unwrap(), before + Duration::from_secs(300));
        assert!(scope.remaining() > Duration::from_secs(300));
    }

    #[test]
    fn extend_has_no_effect_on_cancelled_scope() {
        let parent = CancellationToken::new();
        let scope = RunScope::new(&parent, Duration::from_secs(30));
        scope.cancel(CancelReason::UserQuit);
        assert!(scope.extend(Duration::from_secs(300)).is_none());
    }

    #[tokio::test]
    async fn cancelled_future_resolves_after_cancel() {
        let parent = CancellationToken::new();
        let scope = RunScope::new(&parent, Duration::from_secs(60));
        scope.cancel(CancelReason::WorkerDone);
        // Must not hang.
        scope.cancelled().await;
    }
}
