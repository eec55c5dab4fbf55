//! Administrative booking API.
//!
//! Bodies use camelCase wire names. Every write accepts an optional
//! `Idempotency-Key` header; when absent, one is derived from the
//! canonical payload fingerprint so blind client retries still coalesce.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use reservo_core::domain::booking::{
    BookingRequest, BookingRequestItem, CancellationReason, SlotSuggestion,
};
use reservo_core::domain::idempotency::RequestMeta;
use reservo_core::fingerprint;
use reservo_core::ids::{BookingId, CustomerId, ResourceId, ServiceId, TenantId, TimeslotId};
use reservo_engine::{CancelResponse, ConfirmResponse};
use serde::{Deserialize, Serialize};

/// Header carrying the client's idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// End-to-end budget for one write request.
const REQUEST_BUDGET: std::time::Duration = std::time::Duration::from_secs(30);

/// Create-booking request body.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingBody {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Booking customer.
    pub customer_id: CustomerId,
    /// Booked service.
    pub service_id: ServiceId,
    /// Window start.
    pub start_at: DateTime<Utc>,
    /// Window end.
    pub end_at: DateTime<Utc>,
    /// Slot claims.
    pub items: Vec<CreateBookingItem>,
    /// Total price in minor units.
    pub total_minor: i64,
    /// Whether one failing slot aborts the request.
    #[serde(default = "default_require_all")]
    pub require_all_slots: bool,
}

const fn default_require_all() -> bool {
    true
}

/// One slot claim in the request body.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingItem {
    /// Timeslot to claim.
    pub timeslot_id: TimeslotId,
    /// Resource the slot belongs to.
    pub resource_id: ResourceId,
    /// Slot start.
    pub start_at: DateTime<Utc>,
    /// Slot end.
    pub end_at: DateTime<Utc>,
    /// Units to reserve.
    pub capacity: i32,
    /// Timeslot version read from the availability feed.
    pub expected_version: i64,
}

/// Response envelope: the persisted entity plus request metadata.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingEnvelope<T> {
    /// The persisted entity.
    pub data: T,
    /// Key the write was performed under.
    pub idempotency_key: String,
    /// Alternatives, present only on capacity conflicts (never here on
    /// success, kept for a uniform envelope shape).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<SlotSuggestion>,
}

/// Handler for `POST /v1/admin/bookings`.
///
/// # Errors
///
/// Maps engine errors to their stable codes (422 validation, 409
/// capacity/idempotency, 404 unknown resources).
pub async fn create_booking(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateBookingBody>,
) -> Result<Json<BookingEnvelope<ConfirmResponse>>, ApiError> {
    let payload = serde_json::to_value(&body)
        .map_err(|e| ApiError::bad_request(format!("unserializable body: {e}"), Vec::new()))?;

    let key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
        .unwrap_or_else(|| derived_key(&body.tenant_id, &payload));

    let request = BookingRequest {
        tenant_id: body.tenant_id,
        customer_id: body.customer_id,
        service_id: body.service_id,
        start_at: body.start_at,
        end_at: body.end_at,
        items: body
            .items
            .iter()
            .map(|item| BookingRequestItem {
                timeslot_id: item.timeslot_id,
                resource_id: item.resource_id,
                start_at: item.start_at,
                end_at: item.end_at,
                capacity: item.capacity,
                expected_version: item.expected_version,
            })
            .collect(),
        total_minor: body.total_minor,
        idempotency_key: key.clone(),
        require_all_slots: body.require_all_slots,
    };
    let meta = RequestMeta {
        method: "POST".to_string(),
        url: "/v1/admin/bookings".to_string(),
        content_type: "application/json".to_string(),
        tenant_id: body.tenant_id,
        user: None,
        body: payload,
    };

    // End-to-end request budget; the coordinator finishes or rolls back
    // its in-flight transaction either way.
    let response =
        tokio::time::timeout(REQUEST_BUDGET, state.coordinator.confirm(request, meta))
            .await
            .map_err(|_| {
                ApiError::new(reservo_core::error::ErrorCode::InternalError, "request timed out")
            })??;
    Ok(Json(BookingEnvelope {
        data: response,
        idempotency_key: key,
        suggestions: Vec::new(),
    }))
}

/// Cancel request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelBookingBody {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Why the booking is cancelled.
    pub reason: CancellationReason,
    /// Acting user.
    #[serde(default = "default_actor")]
    pub actor: String,
}

fn default_actor() -> String {
    "admin".to_string()
}

/// Handler for `POST /v1/admin/bookings/{id}/cancel`.
///
/// # Errors
///
/// 404 for unknown bookings, 422 when the cancellation window has closed.
pub async fn cancel_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<BookingId>,
    Json(body): Json<CancelBookingBody>,
) -> Result<Json<BookingEnvelope<CancelResponse>>, ApiError> {
    let response = state
        .coordinator
        .cancel(reservo_engine::CancelRequest {
            tenant_id: body.tenant_id,
            booking_id,
            reason: body.reason,
            actor: body.actor,
        })
        .await?;
    Ok(Json(BookingEnvelope {
        data: response,
        idempotency_key: String::new(),
        suggestions: Vec::new(),
    }))
}

/// Derive a stable key from the canonical payload when the client sent
/// none: identical blind retries coalesce, different payloads do not.
fn derived_key(tenant_id: &TenantId, payload: &serde_json::Value) -> String {
    let canonical = fingerprint::canonical_json(payload);
    let digest = <sha2::Sha256 as sha2::Digest>::digest(canonical.as_bytes());
    format!("auto-{tenant_id}-{}", hex::encode(&digest[..16]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_keys_are_stable_and_payload_sensitive() {
        let tenant = TenantId::nil();
        let a = serde_json::json!({"capacity": 1, "serviceId": "s"});
        let b = serde_json::json!({"serviceId": "s", "capacity": 1});
        let c = serde_json::json!({"capacity": 2, "serviceId": "s"});
        assert_eq!(derived_key(&tenant, &a), derived_key(&tenant, &b));
        assert_ne!(derived_key(&tenant, &a), derived_key(&tenant, &c));
    }
}
