//! Per-upstream circuit breakers.
//!
//! ```text
//! ┌────────┐  failure_threshold  ┌──────┐     cooldown      ┌──────────┐
//! │ Closed │ ─────reached──────→ │ Open │ ────elapsed────→  │ HalfOpen │
//! └────────┘                     └──────┘ ←──probe fails─── └──────────┘
//!      ↑                                                         │
//!      └────────────────────── probe succeeds ───────────────────┘
//! ```
//!
//! Half-open admits a single probe; concurrent callers are rejected until
//! the probe resolves. Guarded calls run on their own task, so an outcome
//! is recorded even when the caller stops waiting for it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::CircuitBreakerConfig;

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    /// Rejecting calls until `until`.
    Open {
        until: Instant,
    },
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open { .. } => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Error from [`CircuitBreaker::guard`].
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// The call was not attempted.
    #[error("circuit open, retry after {retry_after:?}")]
    Open { retry_after: Duration },

    /// The call ran and failed.
    #[error("{0}")]
    Inner(E),

    /// The call panicked or was aborted.
    #[error("guarded call did not complete")]
    Aborted,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    probe_in_flight: bool,
}

/// Thread-safe breaker for one upstream. No I/O happens under its lock.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

/// Permission to make one call. Dropping it without an outcome counts as
/// a failure, which covers panics inside the guarded call.
#[derive(Debug)]
struct Admission {
    breaker: Arc<CircuitBreaker>,
    probe: bool,
    recorded: bool,
}

impl Admission {
    fn record(mut self, success: bool) {
        self.recorded = true;
        self.breaker.on_outcome(self.probe, success);
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        if !self.recorded {
            self.breaker.on_outcome(self.probe, false);
        }
    }
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                probe_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state. An open circuit whose cooldown has elapsed reports
    /// `HalfOpen`.
    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Open { until } if Instant::now() >= until => CircuitState::HalfOpen,
            state => state,
        }
    }

    /// Runs `call` if the circuit admits it and records the outcome.
    ///
    /// The call is spawned, so it must be `'static`. If the returned future
    /// is dropped, the call keeps running and its outcome still counts.
    ///
    /// # Errors
    /// `Open` when the call was rejected, `Inner` with the call's own error,
    /// `Aborted` if the call panicked.
    pub async fn guard<F, T, E>(self: &Arc<Self>, call: F) -> Result<T, BreakerError<E>>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.guard_with(call, Result::is_ok).await
    }

    /// Like [`guard`](Self::guard), but `succeeded` decides whether an
    /// outcome counts as a success. An `Ok` it rejects is still returned
    /// to the caller as `Ok`.
    ///
    /// # Errors
    /// Same as [`guard`](Self::guard).
    pub async fn guard_with<F, T, E, S>(
        self: &Arc<Self>,
        call: F,
        succeeded: S,
    ) -> Result<T, BreakerError<E>>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
        S: FnOnce(&Result<T, E>) -> bool + Send + 'static,
    {
        let admission = self.admit().map_err(|retry_after| BreakerError::Open { retry_after })?;

        let task = tokio::spawn(async move {
            let result = call.await;
            admission.record(succeeded(&result));
            result
        });

        match task.await {
            Ok(result) => result.map_err(BreakerError::Inner),
            Err(_) => Err(BreakerError::Aborted),
        }
    }

    fn admit(self: &Arc<Self>) -> Result<Admission, Duration> {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        let probe = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open { until } if now < until => return Err(until - now),
            CircuitState::Open { .. } | CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    return Err(self.config.cooldown);
                }
                if matches!(inner.state, CircuitState::Open { .. }) {
                    info!(upstream = %self.name, "Circuit half-open, admitting probe");
                }
                inner.state = CircuitState::HalfOpen;
                inner.probe_in_flight = true;
                true
            }
        };

        Ok(Admission {
            breaker: Arc::clone(self),
            probe,
            recorded: false,
        })
    }

    fn on_outcome(&self, probe: bool, success: bool) {
        let mut inner = self.inner.lock();

        if probe {
            inner.probe_in_flight = false;
            if success {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                info!(upstream = %self.name, "Circuit closed, probe succeeded");
            } else {
                inner.state = CircuitState::Open {
                    until: Instant::now() + self.config.cooldown,
                };
                warn!(upstream = %self.name, "Circuit re-opened, probe failed");
            }
            return;
        }

        // Calls admitted while closed only count while the circuit is
        // still closed; the probe alone decides a half-open circuit.
        if inner.state != CircuitState::Closed {
            return;
        }
        if success {
            inner.consecutive_failures = 0;
            return;
        }
        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= self.config.failure_threshold {
            inner.state = CircuitState::Open {
                until: Instant::now() + self.config.cooldown,
            };
            warn!(
                upstream = %self.name,
                failures = inner.consecutive_failures,
                cooldown = ?self.config.cooldown,
                "Circuit opened"
            );
        }
    }
}

/// Breakers keyed by upstream id, created on first use.
#[derive(Debug)]
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Creates breakers for known upstreams up front.
    #[must_use]
    pub fn with_upstreams<'a>(
        config: CircuitBreakerConfig,
        upstreams: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let registry = Self::new(config);
        for upstream in upstreams {
            registry.get(upstream);
        }
        registry
    }

    /// Returns the breaker for `upstream`.
    pub fn get(&self, upstream: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(upstream) {
            return Arc::clone(&breaker);
        }
        self.breakers
            .entry(upstream.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(upstream, self.config)))
            .value()
            .clone()
    }

    /// Snapshot of every breaker's state, for logs and health output.
    pub fn states(&self) -> Vec<(String, CircuitState)> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(10);

    fn breaker(threshold: u32) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            "orders",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                cooldown: COOLDOWN,
            },
        ))
    }

    async fn fail(breaker: &Arc<CircuitBreaker>) -> Result<(), BreakerError<&'static str>> {
        breaker.guard(async { Err::<(), _>("boom") }).await
    }

    async fn succeed(breaker: &Arc<CircuitBreaker>) -> Result<u32, BreakerError<&'static str>> {
        breaker.guard(async { Ok::<_, &'static str>(7) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_skips_calls() {
        let breaker = breaker(3);
        for _ in 0..3 {
            assert!(matches!(fail(&breaker).await, Err(BreakerError::Inner("boom"))));
        }
        assert!(matches!(breaker.state(), CircuitState::Open { .. }));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result = breaker
            .guard(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &'static str>(())
            })
            .await;

        match result {
            Err(BreakerError::Open { retry_after }) => assert_eq!(retry_after, COOLDOWN),
            other => panic!("expected open circuit, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_ok_outcomes_count_as_failures() {
        let breaker = breaker(2);
        for _ in 0..2 {
            let result = breaker
                .guard_with(async { Ok::<u16, &'static str>(503) }, |r| {
                    matches!(r, Ok(status) if *status < 500)
                })
                .await;
            assert!(matches!(result, Ok(503)));
        }
        assert!(matches!(breaker.state(), CircuitState::Open { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let breaker = breaker(3);
        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        succeed(&breaker).await.unwrap();
        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_probe() {
        let breaker = breaker(1);
        fail(&breaker).await.unwrap_err();
        tokio::time::advance(COOLDOWN).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let (release, wait) = tokio::sync::oneshot::channel::<()>();
        let probe = tokio::spawn({
            let breaker = breaker.clone();
            async move {
                breaker
                    .guard(async move {
                        let _ = wait.await;
                        Ok::<_, &'static str>(())
                    })
                    .await
            }
        });
        tokio::task::yield_now().await;

        // Probe is in flight; everyone else is turned away.
        assert!(matches!(succeed(&breaker).await, Err(BreakerError::Open { .. })));

        release.send(()).unwrap();
        probe.await.unwrap().unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(succeed(&breaker).await.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_restarts_cooldown() {
        let breaker = breaker(1);
        fail(&breaker).await.unwrap_err();
        tokio::time::advance(COOLDOWN).await;

        fail(&breaker).await.unwrap_err();
        match breaker.state() {
            CircuitState::Open { until } => assert_eq!(until - Instant::now(), COOLDOWN),
            other => panic!("expected open, got {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_caller_still_records_outcome() {
        let breaker = breaker(1);
        let (release, wait) = tokio::sync::oneshot::channel::<()>();

        let caller = tokio::spawn({
            let breaker = breaker.clone();
            async move {
                breaker
                    .guard(async move {
                        let _ = wait.await;
                        Err::<(), _>("late failure")
                    })
                    .await
            }
        });
        tokio::task::yield_now().await;
        caller.abort();
        let _ = caller.await;

        release.send(()).unwrap();
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        assert!(matches!(breaker.state(), CircuitState::Open { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_probe_reopens() {
        let breaker = breaker(1);
        fail(&breaker).await.unwrap_err();
        tokio::time::advance(COOLDOWN).await;

        let result = breaker
            .guard(async {
                if true {
                    panic!("probe exploded");
                }
                Ok::<(), &'static str>(())
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Aborted)));
        assert!(matches!(breaker.state(), CircuitState::Open { .. }));
    }

    #[tokio::test]
    async fn test_registry_shares_breakers() {
        let registry = BreakerRegistry::with_upstreams(
            CircuitBreakerConfig::default(),
            ["orders", "billing"],
        );
        assert!(Arc::ptr_eq(&registry.get("orders"), &registry.get("orders")));
        assert_eq!(registry.states().len(), 2);
        registry.get("search");
        assert_eq!(registry.states().len(), 3);
    }
}
