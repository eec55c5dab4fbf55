//! Time source abstraction.
//!
//! Everything that reads the wall clock goes through [`Clock`] so tests can
//! pin time. The production implementation is [`SystemClock`]; the test
//! clock lives in `reservo-testing`.

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Monotonic-enough time source for the engine.
///
/// All timestamps in the system are UTC; tenant-local arithmetic happens in
/// [`crate::timegrid`] using explicit offsets.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock backed [`Clock`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Shared clock handle used across services and workers.
pub type SharedClock = Arc<dyn Clock>;

/// Convenience constructor for the production clock.
#[must_use]
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
