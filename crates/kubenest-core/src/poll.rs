//! Generic readiness polling against a cancellable scope.
//!
//! Bootstrap waits (control-plane pods, provider health) all share the same
//! shape: probe immediately, then on a fixed interval, until everything is
//! ready or the run is cancelled. Transient probe errors are expected while
//! the API server is still settling, so they never abort the loop.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::cancel::RunScope;

/// Result of one probe invocation.
#[derive(Debug)]
pub enum Probe<S> {
    /// Everything is ready; polling ends with this snapshot.
    Ready(S),
    /// Not ready yet; keep polling. The snapshot, when present, lets the
    /// probe report partial state to the renderer on its own.
    Pending(Option<S>),
    /// The probe itself failed in a recoverable way; keep polling.
    Transient(String),
}

#[derive(Debug, Error)]
pub enum PollError<E> {
    #[error("readiness wait cancelled")]
    Cancelled,
    #[error("readiness probe failed")]
    Fatal(#[source] E),
}

/// Poll `probe` until it reports ready, returns a fatal error, or the scope
/// is cancelled. The first invocation happens immediately; cancellation takes
/// effect within one `interval`.
pub async fn poll_until_ready<S, E, F, Fut>(
    scope: &RunScope,
    interval: Duration,
    mut probe: F,
) -> Result<S, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe<S>, E>>,
{
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = scope.cancelled() => return Err(PollError::Cancelled),
            _ = ticker.tick() => match probe().await {
                Ok(Probe::Ready(snapshot)) => return Ok(snapshot),
                Ok(Probe::Pending(_)) => {}
                Ok(Probe::Transient(reason)) => {
                    debug!(reason, "transient probe error; retrying");
                }
                Err(err) => return Err(PollError::Fatal(err)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelReason;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;
    use tokio_util::sync::CancellationToken;

    fn scope() -> RunScope {
        RunScope::new(&CancellationToken::new(), Duration::from_secs(60))
    }

    #[tokio::test(start_paused = true)]
    async fn ready_on_third_call_after_transients_takes_exactly_three_probes() {
        let scope = scope();
        let calls = Arc::new(AtomicUsize::new(0));
        let probe_calls = calls.clone();

        let result = poll_until_ready(&scope, Duration::from_millis(100), move || {
            let calls = probe_calls.clone();
            async move {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if call < 3 {
                    Ok::<_, std::io::Error>(Probe::Transient(format!("flaky call {call}")))
                } else {
                    Ok(Probe::Ready("all pods ready"))
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "all pods ready");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn first_probe_runs_immediately() {
        let scope = scope();
        let started = Instant::now();
        let result = poll_until_ready(&scope, Duration::from_secs(10), || async {
            Ok::<_, std::io::Error>(Probe::Ready(()))
        })
        .await;
        assert!(result.is_ok());
        // With a paused clock no interval tick was awaited.
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_ends_the_loop_within_one_interval() {
        let scope = Arc::new(scope());
        let canceller = scope.clone();
        let interval = Duration::from_millis(250);

        let handle = tokio::spawn({
            let scope = scope.clone();
            async move {
                poll_until_ready(&scope, interval, || async {
                    Ok::<_, std::io::Error>(Probe::Pending(None::<()>))
                })
                .await
            }
        });

        // Let the first probe run, then cancel mid-wait.
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel(CancelReason::UserQuit);
        tokio::time::sleep(interval).await;

        let result = handle.await.expect("poll task");
        assert!(matches!(result, Err(PollError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_probe_error_ends_the_loop() {
        let scope = scope();
        let result: Result<(), _> = poll_until_ready(&scope, Duration::from_millis(10), || async {
            Err(std::io::Error::other("api server unreachable"))
        })
        .await;
        assert!(matches!(result, Err(PollError::Fatal(_))));
    }
}
