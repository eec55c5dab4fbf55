//! Transactional outbox rows.
//!
//! An outbox event is appended in the same database transaction as the
//! state change it describes, then drained asynchronously by the relay.

use crate::error::StoreError;
use crate::ids::{OutboxEventId, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known event type strings.
pub mod event_types {
    /// A booking was created and confirmed.
    pub const BOOKING_CREATED: &str = "BOOKING_CREATED";
    /// A booking was created tentatively, pending payment.
    pub const BOOKING_TENTATIVE: &str = "BOOKING_TENTATIVE";
    /// A booking was confirmed after payment.
    pub const BOOKING_CONFIRMED: &str = "BOOKING_CONFIRMED";
    /// A booking was cancelled.
    pub const BOOKING_CANCELLED: &str = "BOOKING_CANCELLED";
    /// A refund was requested for a cancelled booking.
    pub const PAYMENT_REFUND_REQUESTED: &str = "PAYMENT_REFUND_REQUESTED";
    /// A notification permanently failed for a booking.
    pub const NOTIFICATION_FAILED: &str = "NOTIFICATION_FAILED";
}

/// Lifecycle of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    /// Waiting for a relay worker.
    Pending,
    /// Claimed by a relay worker.
    Publishing,
    /// Fully handled.
    Published,
    /// Last attempt failed; will be retried at `next_attempt_at`.
    Failed,
    /// Retry budget exhausted.
    Deadletter,
}

impl OutboxStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Publishing => "publishing",
            Self::Published => "published",
            Self::Failed => "failed",
            Self::Deadletter => "deadletter",
        }
    }

    /// Parse from the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] for an unknown status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "publishing" => Ok(Self::Publishing),
            "published" => Ok(Self::Published),
            "failed" => Ok(Self::Failed),
            "deadletter" => Ok(Self::Deadletter),
            _ => Err(StoreError::Database(format!("invalid outbox status: {s}"))),
        }
    }
}

/// A durable event row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEvent {
    /// Row id.
    pub id: OutboxEventId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Event type, one of [`event_types`] or an extension.
    pub event_type: String,
    /// Aggregate kind the event describes (for example `booking`).
    pub aggregate_type: String,
    /// Aggregate id; relay workers shard on its hash to preserve
    /// per-aggregate order.
    pub aggregate_id: String,
    /// Event payload.
    pub payload: serde_json::Value,
    /// Lifecycle state.
    pub status: OutboxStatus,
    /// Delivery attempts so far.
    pub attempts: i32,
    /// Last delivery error, if any.
    pub last_error: Option<String>,
    /// Earliest next delivery attempt.
    pub next_attempt_at: DateTime<Utc>,
    /// Creation (= commit) timestamp.
    pub created_at: DateTime<Utc>,
    /// When the row reached `published`.
    pub published_at: Option<DateTime<Utc>>,
    /// Trace id propagated from the originating request.
    pub trace_id: Option<String>,
    /// Correlation id propagated from the originating request.
    pub correlation_id: Option<String>,
    /// Relay worker currently holding the claim.
    pub claimed_by: Option<String>,
    /// When the claim was taken.
    pub claimed_at: Option<DateTime<Utc>>,
}

/// An event about to be appended inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOutboxEvent {
    /// Event type.
    pub event_type: String,
    /// Aggregate kind.
    pub aggregate_type: String,
    /// Aggregate id.
    pub aggregate_id: String,
    /// Event payload.
    pub payload: serde_json::Value,
    /// Trace id to propagate.
    pub trace_id: Option<String>,
    /// Correlation id to propagate.
    pub correlation_id: Option<String>,
}

impl NewOutboxEvent {
    /// Build an event for a booking aggregate.
    #[must_use]
    pub fn for_booking(
        event_type: &str,
        booking_id: crate::ids::BookingId,
        payload: serde_json::Value,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            event_type: event_type.to_string(),
            aggregate_type: "booking".to_string(),
            aggregate_id: booking_id.to_string(),
            payload,
            trace_id: None,
            correlation_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbox_status_roundtrip() {
        for status in [
            OutboxStatus::Pending,
            OutboxStatus::Publishing,
            OutboxStatus::Published,
            OutboxStatus::Failed,
            OutboxStatus::Deadletter,
        ] {
            assert_eq!(OutboxStatus::parse(status.as_str()), Ok(status));
        }
        assert!(OutboxStatus::parse("queued").is_err());
    }

    #[test]
    fn booking_event_constructor_targets_booking_aggregate() {
        let id = crate::ids::BookingId::new();
        let event = NewOutboxEvent::for_booking(
            event_types::BOOKING_CREATED,
            id,
            serde_json::json!({"capacity": 1}),
            Some("corr-1".into()),
        );
        assert_eq!(event.aggregate_type, "booking");
        assert_eq!(event.aggregate_id, id.to_string());
        assert_eq!(event.event_type, "BOOKING_CREATED");
    }
}
