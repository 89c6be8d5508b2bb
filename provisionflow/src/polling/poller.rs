//! Bounded, fixed-interval readiness watcher.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::PollSpec;
use crate::context::ProvisioningContext;
use crate::errors::{LastObservation, ProvisionError, TimeoutError};

/// What a single probe observed.
#[derive(Debug)]
pub enum ProbeResult<T> {
    /// The resource is ready; carries the probed value.
    Ready(T),
    /// The resource is still provisioning.
    NotReady(String),
    /// The probe failed. Retriable errors count as not-ready.
    Error(ProvisionError),
}

impl<T> From<Result<Option<T>, ProvisionError>> for ProbeResult<T> {
    fn from(result: Result<Option<T>, ProvisionError>) -> Self {
        match result {
            Ok(Some(value)) => Self::Ready(value),
            Ok(None) => Self::NotReady("not ready".to_string()),
            Err(err) => Self::Error(err),
        }
    }
}

/// Suspends the caller between probes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Sleeper {
    /// Sleeps for the given duration.
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Awaits readiness of asynchronously provisioned resources.
///
/// The poller knows nothing about what it is watching; the probe is
/// injected per call site.
#[derive(Clone)]
pub struct Poller {
    sleeper: Arc<dyn Sleeper + Send + Sync>,
}

impl Default for Poller {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Poller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller").finish_non_exhaustive()
    }
}

impl Poller {
    /// Creates a poller using the tokio timer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Creates a poller with a custom sleeper.
    #[must_use]
    pub fn with_sleeper(sleeper: Arc<dyn Sleeper + Send + Sync>) -> Self {
        Self { sleeper }
    }

    /// Probes until ready, the budget is spent, a permanent error occurs, or
    /// the run is cancelled.
    ///
    /// Makes at most `max_attempts` probe calls and sleeps only between
    /// probes, never after the last one.
    pub async fn await_ready<T, F, Fut>(
        &self,
        spec: &PollSpec,
        ctx: &ProvisioningContext,
        mut probe: F,
    ) -> Result<T, ProvisionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProbeResult<T>>,
    {
        let cancel = ctx.cancel_scope();
        let max_attempts = spec.config.attempts();
        let interval = spec.config.interval();
        let mut waited = Duration::ZERO;
        let mut last = LastObservation::NotReady("never probed".to_string());

        for attempt in 1..=max_attempts {
            cancel.checkpoint()?;

            match probe().await {
                ProbeResult::Ready(value) => {
                    tracing::debug!(label = %spec.label, attempt, "Resource ready");
                    return Ok(value);
                }
                ProbeResult::NotReady(detail) => {
                    tracing::debug!(label = %spec.label, attempt, detail = %detail, "Resource not ready");
                    last = LastObservation::NotReady(detail);
                }
                ProbeResult::Error(err) if err.is_retriable() => {
                    tracing::debug!(label = %spec.label, attempt, error = %err, "Transient probe error");
                    last = LastObservation::TransientError(err.message());
                }
                ProbeResult::Error(err) => {
                    tracing::warn!(label = %spec.label, attempt, error = %err, "Probe failed permanently");
                    return Err(err);
                }
            }

            if attempt == max_attempts {
                break;
            }

            cancel.checkpoint()?;
            tokio::select! {
                () = self.sleeper.sleep(interval) => {}
                () = cancel.cancelled() => {
                    return Err(ProvisionError::cancelled(
                        cancel.reason().unwrap_or_else(|| "cancelled".to_string()),
                    ));
                }
            }
            waited += interval;
        }

        tracing::warn!(
            label = %spec.label,
            attempts = max_attempts,
            waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
            "Readiness wait exhausted"
        );
        Err(TimeoutError {
            label: spec.label.clone(),
            attempts: max_attempts,
            waited,
            last,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::{CancelScope, CancellationToken};
    use crate::context::TenantIdentity;
    use crate::errors::ErrorKind;
    use crate::polling::PollConfig;
    use mockall::predicate::eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ctx() -> ProvisioningContext {
        ProvisioningContext::new(TenantIdentity::new("acme").unwrap())
    }

    fn spec(max_attempts: u32) -> PollSpec {
        PollSpec::new(
            "endpoint",
            PollConfig::new()
                .with_interval(Duration::from_millis(100))
                .with_max_attempts(max_attempts),
        )
    }

    fn sleeper_expecting(sleeps: usize) -> Poller {
        let mut sleeper = MockSleeper::new();
        sleeper
            .expect_sleep()
            .with(eq(Duration::from_millis(100)))
            .times(sleeps)
            .returning(|_| ());
        Poller::with_sleeper(Arc::new(sleeper))
    }

    #[tokio::test]
    async fn test_ready_on_nth_probe() {
        let poller = sleeper_expecting(3);
        let calls = AtomicU32::new(0);
        let ctx = ctx();

        let value = poller
            .await_ready(&spec(10), &ctx, || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 4 {
                        ProbeResult::NotReady(format!("init {n}"))
                    } else {
                        ProbeResult::Ready("ep-1.neon.tech")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "ep-1.neon.tech");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_ready_immediately_does_not_sleep() {
        let poller = sleeper_expecting(0);
        let ctx = ctx();

        let value = poller
            .await_ready(&spec(5), &ctx, || async { ProbeResult::Ready(7) })
            .await
            .unwrap();

        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_timeout_after_exactly_max_attempts() {
        let poller = sleeper_expecting(4);
        let calls = AtomicU32::new(0);
        let ctx = ctx();

        let err = poller
            .await_ready(&spec(5), &ctx, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { ProbeResult::<()>::NotReady("init".to_string()) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        match err {
            ProvisionError::Timeout(timeout) => {
                assert_eq!(timeout.attempts, 5);
                assert_eq!(timeout.waited, Duration::from_millis(400));
                assert!(timeout.still_provisioning());
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let poller = sleeper_expecting(2);
        let calls = AtomicU32::new(0);
        let ctx = ctx();

        let value = poller
            .await_ready(&spec(5), &ctx, || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        ProbeResult::Error(ProvisionError::transient("503"))
                    } else {
                        ProbeResult::Ready(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn test_timeout_records_transient_last_observation() {
        let poller = sleeper_expecting(1);
        let ctx = ctx();

        let err = poller
            .await_ready(&spec(2), &ctx, || async {
                ProbeResult::<()>::Error(ProvisionError::transient("502 bad gateway"))
            })
            .await
            .unwrap_err();

        match err {
            ProvisionError::Timeout(timeout) => {
                assert!(!timeout.still_provisioning());
                assert_eq!(
                    timeout.last,
                    LastObservation::TransientError("502 bad gateway".to_string())
                );
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_permanent_error_aborts_immediately() {
        let poller = sleeper_expecting(0);
        let calls = AtomicU32::new(0);
        let ctx = ctx();

        let err = poller
            .await_ready(&spec(5), &ctx, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { ProbeResult::<()>::Error(ProvisionError::permanent("401 unauthorized")) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.kind(), ErrorKind::Permanent);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_probe() {
        let poller = sleeper_expecting(0);
        let token = Arc::new(CancellationToken::new());
        let ctx = ctx().with_cancel_scope(CancelScope::new(token.clone()));
        token.cancel("operator abort");

        let err = poller
            .await_ready(&spec(5), &ctx, || async { ProbeResult::Ready(()) })
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_sleep() {
        let poller = Poller::new();
        let token = Arc::new(CancellationToken::new());
        let ctx = ctx().with_cancel_scope(CancelScope::new(token.clone()));
        let spec = PollSpec::new(
            "slow",
            PollConfig::new()
                .with_interval(Duration::from_secs(3600))
                .with_max_attempts(3),
        );

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                token.cancel("deadline");
            })
        };

        let err = poller
            .await_ready(&spec, &ctx, || async { ProbeResult::<()>::NotReady("init".to_string()) })
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(err.is_cancelled());
        assert_eq!(err.message(), "deadline");
    }

    #[test]
    fn test_probe_result_from_option() {
        let ready: ProbeResult<u8> = Ok(Some(1)).into();
        let pending: ProbeResult<u8> = Ok(None).into();

        assert!(matches!(ready, ProbeResult::Ready(1)));
        assert!(matches!(pending, ProbeResult::NotReady(_)));
    }
}
