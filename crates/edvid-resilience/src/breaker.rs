//! Per-service circuit breaker.
//!
//! State machine:
//!
//! ```text
//! ┌─────────┐  consecutive failures >= threshold  ┌────────┐
//! │ CLOSED  │ ───────────────────────────────────>│  OPEN  │
//! └─────────┘                                     └────────┘
//!      ^                                               │
//!      │ probe succeeds                                │ cooldown elapsed
//!      │                                               v
//!      │                                     ┌─────────────┐
//!      └──────────────────────────────────── │  HALF-OPEN  │
//!                                            └─────────────┘
//!                                  probe fails     │
//!                                  ────────────────┘ (back to OPEN)
//! ```
//!
//! Half-open admits exactly one probe; concurrent callers fail fast until
//! the probe settles.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through; failures are counted.
    Closed,
    /// Calls fail fast without touching the service.
    Open,
    /// One probe is allowed through to test recovery.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long to stay open before allowing a probe.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            failure_threshold: std::env::var("EDVID_CIRCUIT_FAILURE_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.failure_threshold),
            cooldown: Duration::from_secs(
                std::env::var("EDVID_CIRCUIT_COOLDOWN_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.cooldown.as_secs()),
            ),
        }
    }
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The circuit is open; the service was not called.
    #[error("{service} is unavailable (circuit open)")]
    UpstreamUnavailable { service: String },

    /// The wrapped operation itself failed.
    #[error(transparent)]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::UpstreamUnavailable { .. })
    }
}

/// Thread-safe circuit breaker guarding one external service.
pub struct CircuitBreaker {
    service: String,
    config: CircuitBreakerConfig,
    state: RwLock<CircuitState>,
    consecutive_failures: AtomicU32,
    opened_at: RwLock<Option<Instant>>,
    last_failure_at: RwLock<Option<Instant>>,
    probe_in_flight: AtomicBool,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            service: service.into(),
            config,
            state: RwLock::new(CircuitState::Closed),
            consecutive_failures: AtomicU32::new(0),
            opened_at: RwLock::new(None),
            last_failure_at: RwLock::new(None),
            probe_in_flight: AtomicBool::new(false),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Current state. Lock-free readers may observe one stale transition.
    pub fn state(&self) -> CircuitState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Seconds since the last recorded failure, if any.
    pub fn last_failure_age(&self) -> Option<Duration> {
        self.last_failure_at
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .map(|at| at.elapsed())
    }

    /// Run `op` through the breaker.
    ///
    /// Open circuit → fail fast with `UpstreamUnavailable` without invoking
    /// `op`. Otherwise the result is recorded: success resets the failure
    /// counter (and closes a half-open circuit), failure counts toward the
    /// threshold (and reopens a half-open circuit). Timeouts surface as
    /// errors from `op` and count as failures.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_admit() {
            return Err(BreakerError::UpstreamUnavailable {
                service: self.service.clone(),
            });
        }

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Decide whether a call may proceed, claiming the half-open probe slot
    /// when applicable.
    fn try_admit(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if self.cooldown_elapsed() {
                    self.transition_to_half_open();
                    self.probe_in_flight
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => self
                .probe_in_flight
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok(),
        }
    }

    /// Record a success observed outside `call`.
    pub fn record_success(&self) {
        self.probe_in_flight.store(false, Ordering::SeqCst);
        self.consecutive_failures.store(0, Ordering::SeqCst);

        match self.state() {
            CircuitState::HalfOpen | CircuitState::Open => self.transition_to_closed(),
            CircuitState::Closed => {}
        }
    }

    /// Record a failure observed outside `call`.
    pub fn record_failure(&self) {
        self.probe_in_flight.store(false, Ordering::SeqCst);
        *self
            .last_failure_at
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());

        match self.state() {
            CircuitState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    self.transition_to_open();
                }
            }
            CircuitState::HalfOpen => self.transition_to_open(),
            CircuitState::Open => {}
        }
    }

    fn cooldown_elapsed(&self) -> bool {
        self.opened_at
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .map(|at| at.elapsed() >= self.config.cooldown)
            .unwrap_or(true)
    }

    fn transition_to_open(&self) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = CircuitState::Open;
        *self.opened_at.write().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        warn!(service = %self.service, "circuit breaker OPENED");
    }

    fn transition_to_half_open(&self) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = CircuitState::HalfOpen;
        info!(service = %self.service, "circuit breaker HALF-OPEN, probing");
    }

    fn transition_to_closed(&self) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = CircuitState::Closed;
        *self.opened_at.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.consecutive_failures.store(0, Ordering::SeqCst);
        info!(service = %self.service, "circuit breaker CLOSED");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn breaker(threshold: u32, cooldown_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                cooldown: Duration::from_millis(cooldown_ms),
            },
        )
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_fails_fast() {
        let cb = breaker(3, 60_000);
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let result: Result<(), _> = cb
                .call(|| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("boom")
                })
                .await;
            assert!(result.is_err());
        }
        assert_eq!(cb.state(), CircuitState::Open);

        // Next call must not invoke the underlying service.
        let calls_clone = Arc::clone(&calls);
        let result: Result<(), _> = cb
            .call(|| async move {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok::<(), &str>(())
            })
            .await;
        assert!(matches!(
            result,
            Err(BreakerError::UpstreamUnavailable { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let cb = breaker(3, 60_000);

        let _ = cb.call(|| async { Err::<(), _>("x") }).await;
        let _ = cb.call(|| async { Err::<(), _>("x") }).await;
        let _ = cb.call(|| async { Ok::<_, &str>(()) }).await;
        let _ = cb.call(|| async { Err::<(), _>("x") }).await;
        let _ = cb.call(|| async { Err::<(), _>("x") }).await;

        // Five calls but never three consecutive failures.
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_probe_success_closes() {
        let cb = breaker(1, 0);

        let _ = cb.call(|| async { Err::<(), _>("x") }).await;
        assert_eq!(cb.state(), CircuitState::Open);

        // Cooldown of zero: the next call is the probe.
        let result = cb.call(|| async { Ok::<_, &str>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_probe_failure_reopens() {
        let cb = breaker(1, 0);

        let _ = cb.call(|| async { Err::<(), _>("x") }).await;
        let _ = cb.call(|| async { Err::<(), _>("still down") }).await;
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_half_open_admits_single_probe() {
        let cb = breaker(1, 0);
        let _ = cb.call(|| async { Err::<(), _>("x") }).await;

        // First admit claims the probe slot, second is rejected.
        assert!(cb.try_admit());
        assert!(!cb.try_admit());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_last_failure_age_reported() {
        let cb = breaker(3, 60_000);
        assert!(cb.last_failure_age().is_none());

        let _ = cb.call(|| async { Err::<(), _>("x") }).await;
        assert!(cb.last_failure_age().is_some());
    }
}
