//! Reference data: resources, services, hours, absences, customers.
//!
//! These entities are read-mostly; the policy crate evaluates them and the
//! cache crate keeps them warm. They are never mutated inside a booking
//! transaction.

use crate::error::StoreError;
use crate::ids::{CustomerId, ResourceId, ServiceId, TenantId};
use crate::domain::inventory::ResourceKind;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Operational status of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    /// Bookable.
    Active,
    /// Temporarily out of rotation.
    Maintenance,
    /// Not bookable.
    Inactive,
}

impl ResourceStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Maintenance => "maintenance",
            Self::Inactive => "inactive",
        }
    }

    /// Parse from the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] for an unknown status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "active" => Ok(Self::Active),
            "maintenance" => Ok(Self::Maintenance),
            "inactive" => Ok(Self::Inactive),
            _ => Err(StoreError::Database(format!("invalid resource status: {s}"))),
        }
    }
}

/// A bookable resource with finite capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Row id.
    pub id: ResourceId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// What kind of resource this is.
    pub kind: ResourceKind,
    /// Total concurrent capacity (at least 1).
    pub total_capacity: i32,
    /// Operational status.
    pub status: ResourceStatus,
}

impl Resource {
    /// Whether the resource can accept new reservations.
    #[must_use]
    pub const fn is_bookable(&self) -> bool {
        matches!(self.status, ResourceStatus::Active)
    }
}

/// A service a tenant offers (haircut, table seating, consultation, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Row id.
    pub id: ServiceId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Nominal duration in minutes.
    pub duration_minutes: i32,
    /// Price in minor currency units.
    pub price_minor: i64,
    /// Setup buffer before the service, minutes.
    pub buffer_before_minutes: i32,
    /// Teardown buffer after the service, minutes.
    pub buffer_after_minutes: i32,
    /// Minimum lead time for a booking, minutes.
    pub min_advance_minutes: i64,
    /// Maximum lead time for a booking, days.
    pub max_advance_days: i64,
    /// Whether weekend bookings are allowed.
    pub allow_weekends: bool,
    /// Whether holiday bookings are allowed.
    pub allow_holidays: bool,
    /// Whether bookings start tentative pending approval.
    pub requires_approval: bool,
    /// Whether the service is offered at all.
    pub active: bool,
}

/// Weekly opening window. Rows with `resource_id = None` are tenant
/// defaults; resource-specific rows override them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessHours {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Resource the window applies to, or `None` for the tenant default.
    pub resource_id: Option<ResourceId>,
    /// Day of week the window applies to.
    pub day_of_week: Weekday,
    /// Opening time (tenant-local).
    pub open_time: NaiveTime,
    /// Closing time (tenant-local).
    pub close_time: NaiveTime,
    /// First calendar day the row is effective, if bounded.
    pub effective_from: Option<NaiveDate>,
    /// Last calendar day the row is effective, if bounded.
    pub effective_to: Option<NaiveDate>,
}

impl BusinessHours {
    /// Whether this row is effective on `date`.
    #[must_use]
    pub fn effective_on(&self, date: NaiveDate) -> bool {
        self.effective_from.is_none_or(|from| date >= from)
            && self.effective_to.is_none_or(|to| date <= to)
    }
}

/// A tenant-wide closure day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holiday {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// The closed calendar day.
    pub date: NaiveDate,
    /// Display name.
    pub name: String,
}

/// An absence window for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTimeOff {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Absent resource.
    pub resource_id: ResourceId,
    /// Absence start.
    pub start_at: DateTime<Utc>,
    /// Absence end.
    pub end_at: DateTime<Utc>,
    /// Free-form reason.
    pub reason: Option<String>,
}

/// A customer of a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    /// Row id.
    pub id: CustomerId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Whether the account is active.
    pub active: bool,
    /// Whether the customer is blocked from booking.
    pub blacklisted: bool,
    /// Maximum concurrent active bookings.
    pub max_concurrent: i32,
    /// Preferred notification language (BCP 47 tag), if set.
    pub language: Option<String>,
    /// Email recipient address, if known.
    pub email: Option<String>,
    /// Phone recipient number, if known.
    pub phone: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_status_roundtrip() {
        for status in [ResourceStatus::Active, ResourceStatus::Maintenance, ResourceStatus::Inactive] {
            assert_eq!(ResourceStatus::parse(status.as_str()), Ok(status));
        }
        assert!(ResourceStatus::parse("retired").is_err());
    }

    #[test]
    fn business_hours_effective_window() {
        let mut hours = BusinessHours {
            tenant_id: TenantId::nil(),
            resource_id: None,
            day_of_week: Weekday::Mon,
            open_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            close_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or_default(),
            effective_from: None,
            effective_to: None,
        };
        let date = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap_or_default();
        assert!(hours.effective_on(date));

        hours.effective_from = NaiveDate::from_ymd_opt(2025, 4, 1);
        assert!(!hours.effective_on(date));

        hours.effective_from = NaiveDate::from_ymd_opt(2025, 3, 1);
        hours.effective_to = NaiveDate::from_ymd_opt(2025, 3, 31);
        assert!(hours.effective_on(date));
    }
}
