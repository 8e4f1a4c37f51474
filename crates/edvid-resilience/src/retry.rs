//! Retry with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

/// Backoff policy for retried operations.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first (so 3 = 1 call + 2 retries).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each attempt.
    pub multiplier: f64,
    /// Jitter fraction applied to each delay (0.1 = ±10%).
    pub jitter: f64,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter: 0.1,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: std::env::var("EDVID_RETRY_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_attempts),
            initial_delay: Duration::from_millis(
                std::env::var("EDVID_RETRY_INITIAL_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.initial_delay.as_millis() as u64),
            ),
            multiplier: std::env::var("EDVID_RETRY_MULTIPLIER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.multiplier),
            jitter: defaults.jitter,
            max_delay: defaults.max_delay,
        }
    }

    /// Base (jitter-free) delay before retry number `retry` (1-based).
    pub fn base_delay(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry.saturating_sub(1) as i32);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        Duration::from_millis(millis as u64).min(self.max_delay)
    }

    /// Delay with jitter applied.
    fn jittered_delay(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry).as_millis() as f64;
        if self.jitter <= 0.0 {
            return Duration::from_millis(base as u64);
        }
        let spread = base * self.jitter;
        let jittered = rand::thread_rng().gen_range((base - spread)..=(base + spread));
        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

/// Run `op` up to `policy.max_attempts` times.
///
/// `is_retryable` decides whether an error is worth another attempt;
/// cancellation must be classified non-retryable by the caller so it is
/// never swallowed. The last error is returned on exhaustion.
pub async fn retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_attempts && is_retryable(&e) => {
                let delay = policy.jittered_delay(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "attempt failed, retrying: {e}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
            jitter: 0.1,
            max_delay: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_base_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            ..Default::default()
        };
        assert_eq!(policy.base_delay(1), Duration::from_millis(500));
        assert_eq!(policy.base_delay(2), Duration::from_millis(1000));
        assert_eq!(policy.base_delay(3), Duration::from_millis(2000));
        assert_eq!(policy.base_delay(20), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_succeeds_on_later_attempt() {
        let calls = AtomicU32::new(0);
        let result = retry(&fast_policy(3), "flaky", |_| true, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient")
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_total_attempts_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry(&fast_policy(3), "down", |_| true, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("still down") }
        })
        .await;

        assert_eq!(result.unwrap_err(), "still down");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry(&fast_policy(5), "cancelled", |_| false, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("cancelled") }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
