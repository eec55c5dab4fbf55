//! Booking entities and the confirm-request shape.

use crate::error::StoreError;
use crate::ids::{BookingId, CustomerId, ResourceId, ServiceId, TenantId, TimeslotId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a booking.
///
/// `Tentative` bookings hold capacity but are not final and always carry a
/// non-null `expires_at` in the future. `Cancelled`, `NoShow`, and
/// `Completed` are terminal and set only by explicit operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    /// Capacity held, awaiting payment or approval.
    Tentative,
    /// Final.
    Confirmed,
    /// Cancelled by customer, tenant, or expiry.
    Cancelled,
    /// Customer did not show up.
    NoShow,
    /// Service delivered.
    Completed,
}

impl BookingStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tentative => "tentative",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::NoShow => "noshow",
            Self::Completed => "completed",
        }
    }

    /// Parse from the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] for an unknown status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "tentative" => Ok(Self::Tentative),
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" => Ok(Self::Cancelled),
            "noshow" => Ok(Self::NoShow),
            "completed" => Ok(Self::Completed),
            _ => Err(StoreError::Database(format!("invalid booking status: {s}"))),
        }
    }

    /// Whether the booking still holds capacity.
    #[must_use]
    pub const fn holds_capacity(self) -> bool {
        matches!(self, Self::Tentative | Self::Confirmed)
    }

    /// Whether the status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::NoShow | Self::Completed)
    }
}

/// Why a booking was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancellationReason {
    /// Customer asked to cancel.
    CustomerRequest,
    /// Emergency; bypasses the cancellation window and penalty.
    Emergency,
    /// The business closed; bypasses the window and penalty.
    BusinessClosure,
    /// Tentative booking expired without payment.
    PaymentFailed,
    /// Administrative cancellation.
    Administrative,
}

impl CancellationReason {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CustomerRequest => "CUSTOMER_REQUEST",
            Self::Emergency => "EMERGENCY",
            Self::BusinessClosure => "BUSINESS_CLOSURE",
            Self::PaymentFailed => "PAYMENT_FAILED",
            Self::Administrative => "ADMINISTRATIVE",
        }
    }

    /// Whether this reason bypasses the cancellation window and penalty.
    #[must_use]
    pub const fn bypasses_policy(self) -> bool {
        matches!(self, Self::Emergency | Self::BusinessClosure)
    }
}

/// A reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    /// Row id.
    pub id: BookingId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Booking customer.
    pub customer_id: CustomerId,
    /// Booked service.
    pub service_id: ServiceId,
    /// Start of the booked window.
    pub start_at: DateTime<Utc>,
    /// End of the booked window.
    pub end_at: DateTime<Utc>,
    /// Lifecycle state.
    pub status: BookingStatus,
    /// Total price in minor currency units.
    pub total_minor: i64,
    /// Idempotency key the booking was created under.
    pub idempotency_key: String,
    /// Expiry for tentative bookings; `None` once final.
    pub expires_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// One capacity unit claim of a booking on a timeslot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingItem {
    /// Owning booking.
    pub booking_id: BookingId,
    /// Claimed timeslot.
    pub timeslot_id: TimeslotId,
    /// Resource the slot belongs to.
    pub resource_id: ResourceId,
    /// Units reserved (at least 1).
    pub reserved_capacity: i32,
}

/// Immutable audit record of a booking transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingChange {
    /// Booking the change belongs to.
    pub booking_id: BookingId,
    /// Status before the transition; `None` on creation.
    pub old_status: Option<BookingStatus>,
    /// Status after the transition.
    pub new_status: BookingStatus,
    /// Window start before the transition, when it changed.
    pub old_start_at: Option<DateTime<Utc>>,
    /// Window start after the transition.
    pub new_start_at: DateTime<Utc>,
    /// Free-form reason.
    pub reason: Option<String>,
    /// Who performed the transition.
    pub actor: String,
    /// When the transition happened.
    pub changed_at: DateTime<Utc>,
}

/// A concrete alternative offered when a request cannot be satisfied:
/// the next windows on the resource that still fit the requested capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotSuggestion {
    /// Resource the alternative is on.
    pub resource_id: ResourceId,
    /// Alternative start.
    pub start_at: DateTime<Utc>,
    /// Alternative end.
    pub end_at: DateTime<Utc>,
    /// Why this alternative is offered.
    pub reason: String,
}

/// One requested slot claim inside a booking request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequestItem {
    /// Timeslot to claim.
    pub timeslot_id: TimeslotId,
    /// Resource the slot belongs to.
    pub resource_id: ResourceId,
    /// Slot start, echoed for validation.
    pub start_at: DateTime<Utc>,
    /// Slot end, echoed for validation.
    pub end_at: DateTime<Utc>,
    /// Units to reserve.
    pub capacity: i32,
    /// Timeslot version the caller read.
    pub expected_version: i64,
}

/// A confirm request as the coordinator receives it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Booking customer.
    pub customer_id: CustomerId,
    /// Booked service.
    pub service_id: ServiceId,
    /// Requested window start.
    pub start_at: DateTime<Utc>,
    /// Requested window end.
    pub end_at: DateTime<Utc>,
    /// Slot claims; the coordinator sorts them into canonical lock order.
    pub items: Vec<BookingRequestItem>,
    /// Total price in minor units.
    pub total_minor: i64,
    /// Client-supplied idempotency key.
    pub idempotency_key: String,
    /// Whether a single failing slot aborts the whole request.
    pub require_all_slots: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn booking_status_roundtrip() {
        for status in [
            BookingStatus::Tentative,
            BookingStatus::Confirmed,
            BookingStatus::Cancelled,
            BookingStatus::NoShow,
            BookingStatus::Completed,
        ] {
            assert_eq!(BookingStatus::parse(status.as_str()), Ok(status));
        }
        assert!(BookingStatus::parse("held").is_err());
    }

    #[test]
    fn capacity_holding_states() {
        assert!(BookingStatus::Tentative.holds_capacity());
        assert!(BookingStatus::Confirmed.holds_capacity());
        assert!(!BookingStatus::Cancelled.holds_capacity());
        assert!(BookingStatus::Cancelled.is_terminal());
        assert!(!BookingStatus::Tentative.is_terminal());
    }

    #[test]
    fn emergency_reasons_bypass_policy() {
        assert!(CancellationReason::Emergency.bypasses_policy());
        assert!(CancellationReason::BusinessClosure.bypasses_policy());
        assert!(!CancellationReason::CustomerRequest.bypasses_policy());
    }
}
