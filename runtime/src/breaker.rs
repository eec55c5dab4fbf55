//! Circuit breaker for notification provider calls.
//!
//! Closed passes calls through and counts consecutive failures. Open
//! rejects immediately until the cool-down elapses, then HalfOpen lets a
//! probe through; enough probe successes close the circuit again.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Breaker tuning.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: usize,
    /// How long the circuit stays open before probing.
    pub cool_down: Duration,
    /// Probe successes required to close again.
    pub success_threshold: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected.
    Open,
    /// Probing recovery.
    HalfOpen,
}

/// Error from a guarded call.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The circuit is open; the call was not attempted.
    #[error("circuit open")]
    Open,
    /// The call was attempted and failed.
    #[error(transparent)]
    Inner(E),
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: usize,
    probe_successes: usize,
    opened_at: Option<Instant>,
}

/// Circuit breaker guarding one downstream dependency.
#[derive(Debug)]
pub struct Breaker {
    name: &'static str,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl Breaker {
    /// Create a breaker named for its dependency (used in logs/metrics).
    #[must_use]
    pub const fn new(name: &'static str, config: BreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                probe_successes: 0,
                opened_at: None,
            }),
        }
    }

    /// Current state (Open lazily decays to HalfOpen after the cool-down).
    #[must_use]
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        self.decay_open(&mut inner);
        inner.state
    }

    fn decay_open(&self, inner: &mut Inner) {
        if inner.state == BreakerState::Open {
            let elapsed = inner.opened_at.map_or(Duration::ZERO, |t| t.elapsed());
            if elapsed >= self.config.cool_down {
                inner.state = BreakerState::HalfOpen;
                inner.probe_successes = 0;
                tracing::info!(breaker = self.name, "circuit half-open, probing");
            }
        }
    }

    /// Run `operation` through the breaker.
    ///
    /// # Errors
    ///
    /// [`BreakerError::Open`] when the circuit rejects the call;
    /// [`BreakerError::Inner`] when the call itself fails.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        {
            let mut inner = self.inner.lock();
            self.decay_open(&mut inner);
            if inner.state == BreakerState::Open {
                metrics::counter!("runtime.breaker.rejected", "breaker" => self.name)
                    .increment(1);
                return Err(BreakerError::Open);
            }
        }

        match operation().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(BreakerError::Inner(err))
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.probe_successes += 1;
                if inner.probe_successes >= self.config.success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                    tracing::info!(breaker = self.name, "circuit closed");
                }
            }
            _ => inner.consecutive_failures = 0,
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                tracing::warn!(breaker = self.name, "probe failed, circuit re-opened");
            }
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    tracing::warn!(
                        breaker = self.name,
                        failures = inner.consecutive_failures,
                        "circuit opened"
                    );
                    metrics::counter!("runtime.breaker.opened", "breaker" => self.name)
                        .increment(1);
                }
            }
            BreakerState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 2,
            cool_down: Duration::from_millis(20),
            success_threshold: 1,
        }
    }

    async fn fail(breaker: &Breaker) {
        let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let breaker = Breaker::new("test", fast_config());
        fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Closed);
        fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        let rejected = breaker.call(|| async { Ok::<_, &str>(1) }).await;
        assert!(matches!(rejected, Err(BreakerError::Open)));
    }

    #[tokio::test]
    async fn recovers_through_half_open() {
        let breaker = Breaker::new("test", fast_config());
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        let ok = breaker.call(|| async { Ok::<_, &str>(1) }).await;
        assert!(ok.is_ok());
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn failed_probe_reopens() {
        let breaker = Breaker::new("test", fast_config());
        fail(&breaker).await;
        fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn success_resets_failure_streak() {
        let breaker = Breaker::new("test", fast_config());
        fail(&breaker).await;
        let _ = breaker.call(|| async { Ok::<_, &str>(1) }).await;
        fail(&breaker).await;
        // Streak was broken, so two non-consecutive failures stay closed.
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
