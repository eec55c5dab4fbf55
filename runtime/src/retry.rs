//! Bounded retry with exponential backoff.
//!
//! The booking coordinator wraps its transactional unit of work in
//! [`retry_if`] with a predicate that accepts only retryable store errors
//! (serialization failure, deadlock detected). Attempt `n` sleeps
//! `base * 2^(n-1)`, so the defaults produce the 100/200/400 ms ladder.

use std::time::Duration;
use tokio::time::sleep;

/// Backoff schedule for retries.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Maximum retry attempts after the initial try.
    pub max_retries: usize,
    /// Backoff for the first retry.
    pub base: Duration,
    /// Cap applied to every computed delay.
    pub cap: Duration,
    /// Add up to 10% random jitter to each delay.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base: Duration::from_millis(100),
            cap: Duration::from_secs(30),
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    /// Policy from the engine's deadlock configuration.
    #[must_use]
    pub const fn from_deadlock_config(max_retries: usize, backoff_ms: u64) -> Self {
        Self {
            max_retries,
            base: Duration::from_millis(backoff_ms),
            cap: Duration::from_secs(30),
            jitter: false,
        }
    }

    /// Enable jitter.
    #[must_use]
    pub const fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Delay before retry `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped, with optional jitter.
    #[must_use]
    pub fn delay(&self, attempt: usize) -> Duration {
        let exponent = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        let raw = self
            .base
            .saturating_mul(2u32.saturating_pow(exponent.min(20)));
        let capped = raw.min(self.cap);
        if self.jitter {
            let jitter_ms = (capped.as_millis() as u64) / 10;
            if jitter_ms > 0 {
                return capped + Duration::from_millis(rand::random::<u64>() % jitter_ms);
            }
        }
        capped
    }
}

/// Retry `operation` while `is_retryable` accepts the error, up to the
/// policy's budget.
///
/// Non-retryable errors fail immediately. The last error is returned when
/// the budget runs out.
///
/// # Errors
///
/// Returns the operation's error when it is not retryable or the retry
/// budget is exhausted.
pub async fn retry_if<F, Fut, T, E, P>(
    policy: BackoffPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0usize;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(attempt, "operation succeeded after retry");
                    metrics::counter!("runtime.retry.recovered").increment(1);
                }
                return Ok(value);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    return Err(err);
                }
                if attempt >= policy.max_retries {
                    tracing::error!(attempt, error = %err, "retry budget exhausted");
                    metrics::counter!("runtime.retry.exhausted").increment(1);
                    return Err(err);
                }
                attempt += 1;
                let delay = policy.delay(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "transient failure, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn delay_ladder_doubles_from_base() {
        let policy = BackoffPolicy::from_deadlock_config(3, 100);
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
    }

    #[test]
    fn delay_is_capped() {
        let policy = BackoffPolicy {
            max_retries: 10,
            base: Duration::from_secs(10),
            cap: Duration::from_secs(15),
            jitter: false,
        };
        assert_eq!(policy.delay(5), Duration::from_secs(15));
    }

    #[tokio::test]
    async fn succeeds_without_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let result = retry_if(
            BackoffPolicy::default(),
            || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(7)
                }
            },
            |_| true,
        )
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(1),
            ..BackoffPolicy::default()
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let result = retry_if(
            policy,
            || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("deadlock detected".to_string())
                    } else {
                        Ok(42)
                    }
                }
            },
            |err| err.contains("deadlock"),
        )
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_fast() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<i32, String> = retry_if(
            BackoffPolicy::default(),
            || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("unique violation".to_string())
                }
            },
            |err| err.contains("deadlock"),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn budget_exhaustion_returns_last_error() {
        let policy = BackoffPolicy {
            max_retries: 2,
            base: Duration::from_millis(1),
            ..BackoffPolicy::default()
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<i32, String> = retry_if(
            policy,
            || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("deadlock detected".to_string())
                }
            },
            |err| err.contains("deadlock"),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3); // initial + 2 retries
    }
}
