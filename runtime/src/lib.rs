//! Resilience primitives for the reservation engine.
//!
//! Three building blocks the engine and dispatcher lean on:
//!
//! - [`retry`]: bounded retry with exponential backoff for transient
//!   persistence faults (serialization failures, deadlocks) and provider
//!   hiccups.
//! - [`breaker`]: a circuit breaker guarding notification provider calls.
//! - [`rate_limit`]: token buckets for per-channel delivery rates and the
//!   public availability endpoint.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod breaker;
pub mod rate_limit;
pub mod retry;

pub use breaker::{Breaker, BreakerConfig, BreakerError, BreakerState};
pub use rate_limit::{RateLimiterRegistry, TokenBucket, TokenBucketConfig};
pub use retry::{retry_if, BackoffPolicy};
