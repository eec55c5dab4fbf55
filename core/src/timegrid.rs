//! Timeslot grid arithmetic.
//!
//! Timeslots are fixed-duration buckets (5 or 15 minutes) aligned to the
//! hour. This module owns the alignment and enumeration helpers used by
//! bulk slot creation and by the alternative-suggestion scan.

use chrono::{DateTime, Duration, Timelike, Utc};

/// Slot granularity supported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SlotGranularity {
    /// Five-minute buckets.
    FiveMinutes,
    /// Fifteen-minute buckets.
    FifteenMinutes,
}

impl SlotGranularity {
    /// Bucket length in minutes.
    #[must_use]
    pub const fn minutes(self) -> i64 {
        match self {
            Self::FiveMinutes => 5,
            Self::FifteenMinutes => 15,
        }
    }

    /// Bucket length as a [`Duration`].
    #[must_use]
    pub fn duration(self) -> Duration {
        Duration::minutes(self.minutes())
    }
}

/// Align an instant down to the start of its bucket.
#[must_use]
pub fn align_down(at: DateTime<Utc>, granularity: SlotGranularity) -> DateTime<Utc> {
    let step = granularity.minutes();
    let truncated = at
        - Duration::seconds(i64::from(at.second()))
        - Duration::nanoseconds(i64::from(at.nanosecond()));
    truncated - Duration::minutes(i64::from(at.minute()) % step)
}

/// Align an instant up to the start of the next bucket (identity when
/// already aligned).
#[must_use]
pub fn align_up(at: DateTime<Utc>, granularity: SlotGranularity) -> DateTime<Utc> {
    let down = align_down(at, granularity);
    if down == at { at } else { down + granularity.duration() }
}

/// Enumerate `[start, end)` bucket boundaries covering `[from, to)`.
///
/// The first slot starts at `align_up(from)`; the last slot ends at or
/// before `to`. Used by bulk timeslot creation and the forward scan that
/// computes alternative suggestions.
#[must_use]
pub fn slots_between(
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    granularity: SlotGranularity,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let step = granularity.duration();
    let mut out = Vec::new();
    let mut cursor = align_up(from, granularity);
    while cursor + step <= to {
        out.push((cursor, cursor + step));
        cursor += step;
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, h, m, s).single().unwrap()
    }

    #[test]
    fn align_down_snaps_to_bucket_start() {
        assert_eq!(align_down(at(10, 7, 30), SlotGranularity::FiveMinutes), at(10, 5, 0));
        assert_eq!(align_down(at(10, 7, 30), SlotGranularity::FifteenMinutes), at(10, 0, 0));
        assert_eq!(align_down(at(10, 15, 0), SlotGranularity::FifteenMinutes), at(10, 15, 0));
    }

    #[test]
    fn align_up_is_identity_on_boundary() {
        assert_eq!(align_up(at(10, 15, 0), SlotGranularity::FifteenMinutes), at(10, 15, 0));
        assert_eq!(align_up(at(10, 16, 0), SlotGranularity::FifteenMinutes), at(10, 30, 0));
    }

    #[test]
    fn slots_between_covers_whole_buckets_only() {
        let slots = slots_between(at(10, 0, 0), at(11, 0, 0), SlotGranularity::FifteenMinutes);
        assert_eq!(slots.len(), 4);
        assert_eq!(slots[0], (at(10, 0, 0), at(10, 15, 0)));
        assert_eq!(slots[3], (at(10, 45, 0), at(11, 0, 0)));

        // A partial trailing bucket is excluded.
        let slots = slots_between(at(10, 0, 0), at(10, 50, 0), SlotGranularity::FifteenMinutes);
        assert_eq!(slots.len(), 3);
    }
}
