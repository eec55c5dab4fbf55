//! Token-bucket rate limiting.
//!
//! Buckets refill continuously at a fixed per-minute rate. A rejected
//! acquisition reports how long the caller should wait, which the
//! dispatcher uses to requeue a job with a computed delay and the public
//! availability endpoint turns into a `Retry-After` header.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Bucket tuning.
#[derive(Debug, Clone, Copy)]
pub struct TokenBucketConfig {
    /// Burst capacity in tokens.
    pub capacity: u32,
    /// Refill rate in tokens per minute.
    pub per_minute: u32,
}

impl TokenBucketConfig {
    /// A bucket allowing `per_minute` events per minute with equal burst.
    #[must_use]
    pub const fn per_minute(per_minute: u32) -> Self {
        Self {
            capacity: per_minute,
            per_minute,
        }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// One token bucket.
#[derive(Debug)]
pub struct TokenBucket {
    config: TokenBucketConfig,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket.
    #[must_use]
    pub fn new(config: TokenBucketConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BucketState {
                tokens: f64::from(config.capacity),
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        let rate_per_sec = f64::from(self.config.per_minute) / 60.0;
        state.tokens = (state.tokens + elapsed * rate_per_sec).min(f64::from(self.config.capacity));
        state.last_refill = now;
    }

    /// Try to take one token. `Ok(())` on success; `Err(wait)` with the
    /// time until a token becomes available otherwise.
    ///
    /// # Errors
    ///
    /// Returns the wait duration when the bucket is empty.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return Ok(());
        }
        let rate_per_sec = f64::from(self.config.per_minute) / 60.0;
        let deficit = 1.0 - state.tokens;
        let wait_secs = if rate_per_sec > 0.0 {
            deficit / rate_per_sec
        } else {
            60.0
        };
        Err(Duration::from_secs_f64(wait_secs))
    }

    /// Tokens currently available (diagnostics).
    #[must_use]
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }
}

/// Keyed collection of buckets sharing one configuration, for per-`(ip,
/// tenant)` or per-channel limits.
#[derive(Debug)]
pub struct RateLimiterRegistry {
    config: TokenBucketConfig,
    buckets: Mutex<HashMap<String, std::sync::Arc<TokenBucket>>>,
}

impl RateLimiterRegistry {
    /// Create a registry minting buckets with `config`.
    #[must_use]
    pub fn new(config: TokenBucketConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a token for `key`, minting the bucket on first use.
    ///
    /// # Errors
    ///
    /// Returns the wait duration when the key's bucket is empty.
    pub fn try_acquire(&self, key: &str) -> Result<(), Duration> {
        let bucket = {
            let mut buckets = self.buckets.lock();
            std::sync::Arc::clone(
                buckets
                    .entry(key.to_string())
                    .or_insert_with(|| std::sync::Arc::new(TokenBucket::new(self.config))),
            )
        };
        let result = bucket.try_acquire();
        if result.is_err() {
            tracing::debug!(key, "rate limit exceeded");
            metrics::counter!("runtime.rate_limit.rejected").increment(1);
        }
        result
    }

    /// Drop buckets that are full again (idle keys), bounding memory.
    pub fn shed_idle(&self) {
        let mut buckets = self.buckets.lock();
        buckets.retain(|_, bucket| bucket.available() < f64::from(self.config.capacity));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_allows_burst_up_to_capacity() {
        let bucket = TokenBucket::new(TokenBucketConfig {
            capacity: 3,
            per_minute: 60,
        });
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_err());
    }

    #[test]
    fn rejection_reports_a_positive_wait() {
        let bucket = TokenBucket::new(TokenBucketConfig {
            capacity: 1,
            per_minute: 60,
        });
        assert!(bucket.try_acquire().is_ok());
        let wait = bucket.try_acquire().err().map_or(Duration::ZERO, |d| d);
        // One token per second refill: the wait is about a second.
        assert!(wait > Duration::from_millis(500) && wait <= Duration::from_secs(2));
    }

    #[test]
    fn bucket_refills_over_time() {
        let bucket = TokenBucket::new(TokenBucketConfig {
            capacity: 1,
            per_minute: 6000, // 100/sec for a fast test
        });
        assert!(bucket.try_acquire().is_ok());
        std::thread::sleep(Duration::from_millis(50));
        assert!(bucket.try_acquire().is_ok());
    }

    #[test]
    fn registry_isolates_keys() {
        let registry = RateLimiterRegistry::new(TokenBucketConfig {
            capacity: 1,
            per_minute: 1,
        });
        assert!(registry.try_acquire("a:tenant1").is_ok());
        assert!(registry.try_acquire("a:tenant1").is_err());
        assert!(registry.try_acquire("b:tenant1").is_ok());
    }

    #[test]
    fn shed_idle_drops_full_buckets() {
        let registry = RateLimiterRegistry::new(TokenBucketConfig {
            capacity: 1,
            per_minute: 6000,
        });
        let _ = registry.try_acquire("hot");
        std::thread::sleep(Duration::from_millis(50));
        registry.shed_idle();
        let buckets = registry.buckets.lock();
        assert!(buckets.is_empty());
    }
}
