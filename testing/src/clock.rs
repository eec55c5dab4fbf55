//! Settable clock for tests.

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use reservo_core::clock::Clock;
use std::sync::Arc;

/// A clock that only moves when told to.
#[derive(Clone)]
pub struct TestClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl TestClock {
    /// Clock pinned to `at`.
    #[must_use]
    pub fn at(at: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(at)),
        }
    }

    /// Clock pinned to a fixed, readable default instant.
    #[must_use]
    pub fn fixed() -> Self {
        let at = Utc
            .with_ymd_and_hms(2025, 3, 10, 8, 0, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        Self::at(at)
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    /// Jump the clock to an instant.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_only_when_told() {
        let clock = TestClock::fixed();
        let before = clock.now();
        assert_eq!(clock.now(), before);
        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now(), before + Duration::minutes(5));
    }
}
