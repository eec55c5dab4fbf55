//! Business-hours, holiday, and time-off evaluation.
//!
//! Business-hours rows store tenant-local times of day; evaluation converts
//! the requested UTC window into tenant-local time using the tenant's UTC
//! offset. Resource-specific rows override tenant defaults for the same
//! weekday. A slot fits a window when `open <= start` and `end <= close`
//! (a slot ending exactly at close is the last admissible one).

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use reservo_core::domain::catalog::{BusinessHours, Holiday, ResourceTimeOff};
use reservo_core::ids::ResourceId;

/// A tenant-local open window on one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenWindow {
    /// Opening time.
    pub open: NaiveTime,
    /// Closing time.
    pub close: NaiveTime,
}

/// Shift a UTC instant into tenant-local time.
#[must_use]
pub fn to_local(at: DateTime<Utc>, utc_offset_minutes: i32) -> chrono::NaiveDateTime {
    (at + Duration::minutes(i64::from(utc_offset_minutes))).naive_utc()
}

/// The open windows effective for `resource` on `date`.
///
/// Resource-specific rows win; tenant defaults (rows with no resource)
/// apply only when the resource has no row for that weekday.
#[must_use]
pub fn day_windows(
    hours: &[BusinessHours],
    resource_id: ResourceId,
    date: NaiveDate,
    weekday: Weekday,
) -> Vec<OpenWindow> {
    let effective = |row: &&BusinessHours| {
        row.day_of_week == weekday && row.effective_on(date)
    };
    let specific: Vec<&BusinessHours> = hours
        .iter()
        .filter(|row| row.resource_id == Some(resource_id))
        .filter(effective)
        .collect();
    let chosen: Vec<&BusinessHours> = if specific.is_empty() {
        hours
            .iter()
            .filter(|row| row.resource_id.is_none())
            .filter(effective)
            .collect()
    } else {
        specific
    };
    let mut windows: Vec<OpenWindow> = chosen
        .iter()
        .map(|row| OpenWindow {
            open: row.open_time,
            close: row.close_time,
        })
        .collect();
    windows.sort_by_key(|w| w.open);
    windows
}

/// Whether `[start, end]` (local times of day) fits inside one window.
#[must_use]
pub fn fits_any_window(windows: &[OpenWindow], start: NaiveTime, end: NaiveTime) -> bool {
    windows
        .iter()
        .any(|w| w.open <= start && end <= w.close && start < end)
}

/// The next opening strictly after `after` on the same day, used as the
/// suggested alternative when a request falls outside hours.
#[must_use]
pub fn next_open_after(windows: &[OpenWindow], after: NaiveTime) -> Option<NaiveTime> {
    windows.iter().map(|w| w.open).filter(|open| *open > after).min()
}

/// Whether `date` is a holiday.
#[must_use]
pub fn is_holiday(holidays: &[Holiday], date: NaiveDate) -> bool {
    holidays.iter().any(|h| h.date == date)
}

/// Whether `[start, end)` overlaps any time-off window of the resource.
#[must_use]
pub fn overlaps_time_off(
    time_off: &[ResourceTimeOff],
    resource_id: ResourceId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> bool {
    time_off
        .iter()
        .filter(|t| t.resource_id == resource_id)
        .any(|t| t.start_at < end && t.end_at > start)
}

/// Whether the weekday is a weekend day.
#[must_use]
pub const fn is_weekend(weekday: Weekday) -> bool {
    matches!(weekday, Weekday::Sat | Weekday::Sun)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reservo_core::ids::TenantId;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn row(resource: Option<ResourceId>, day: Weekday, open: NaiveTime, close: NaiveTime) -> BusinessHours {
        BusinessHours {
            tenant_id: TenantId::nil(),
            resource_id: resource,
            day_of_week: day,
            open_time: open,
            close_time: close,
            effective_from: None,
            effective_to: None,
        }
    }

    #[test]
    fn resource_rows_override_tenant_defaults() {
        let r = ResourceId::new();
        let hours = vec![
            row(None, Weekday::Mon, t(9, 0), t(17, 0)),
            row(Some(r), Weekday::Mon, t(12, 0), t(20, 0)),
        ];
        let date = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(); // a Monday
        let windows = day_windows(&hours, r, date, Weekday::Mon);
        assert_eq!(windows, vec![OpenWindow { open: t(12, 0), close: t(20, 0) }]);

        let other = ResourceId::new();
        let windows = day_windows(&hours, other, date, Weekday::Mon);
        assert_eq!(windows, vec![OpenWindow { open: t(9, 0), close: t(17, 0) }]);
    }

    #[test]
    fn slot_ending_exactly_at_close_fits() {
        let windows = vec![OpenWindow { open: t(9, 0), close: t(17, 0) }];
        assert!(fits_any_window(&windows, t(16, 0), t(17, 0)));
        assert!(!fits_any_window(&windows, t(16, 30), t(17, 15)));
        assert!(!fits_any_window(&windows, t(17, 0), t(17, 15)));
        assert!(!fits_any_window(&windows, t(8, 30), t(9, 30)));
    }

    #[test]
    fn next_open_finds_later_window_same_day() {
        let windows = vec![
            OpenWindow { open: t(9, 0), close: t(12, 0) },
            OpenWindow { open: t(14, 0), close: t(18, 0) },
        ];
        assert_eq!(next_open_after(&windows, t(12, 30)), Some(t(14, 0)));
        assert_eq!(next_open_after(&windows, t(18, 0)), None);
        assert_eq!(next_open_after(&windows, t(8, 0)), Some(t(9, 0)));
    }

    #[test]
    fn time_off_overlap_is_half_open() {
        let r = ResourceId::new();
        let start = Utc.with_ymd_and_hms(2025, 3, 10, 10, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let off = vec![ResourceTimeOff {
            tenant_id: TenantId::nil(),
            resource_id: r,
            start_at: end, // back-to-back, no overlap
            end_at: end + Duration::hours(2),
            reason: None,
        }];
        assert!(!overlaps_time_off(&off, r, start, end));
        assert!(overlaps_time_off(&off, r, start, end + Duration::minutes(1)));
        assert!(!overlaps_time_off(&off, ResourceId::new(), start, end + Duration::hours(3)));
    }

    #[test]
    fn local_shift_applies_offset() {
        let at = Utc.with_ymd_and_hms(2025, 3, 10, 23, 30, 0).unwrap();
        let local = to_local(at, 540); // UTC+9
        assert_eq!(local.date(), NaiveDate::from_ymd_opt(2025, 3, 11).unwrap());
        assert_eq!(local.time(), t(8, 30));
    }
}
