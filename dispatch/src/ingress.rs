//! Webhook ingress.
//!
//! Incoming provider callbacks carry a signature header of the form
//! `t=<unix-seconds>,v1=<hex hmac>`. The ingress rejects stale timestamps,
//! verifies the HMAC-SHA256 over `"{t}.{body}"` in constant time,
//! deduplicates by `(provider, provider_event_id)`, and routes the event:
//! payment outcomes advance the booking engine, delivery statuses update
//! the matching dispatch row.

use chrono::{DateTime, Utc};
use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use reservo_core::clock::SharedClock;
use reservo_core::domain::notification::DispatchStatus;
use reservo_core::error::{CoreError, StoreError};
use reservo_core::ids::{BookingId, TenantId};
use reservo_core::stores::{DispatchStore, WebhookDedupStore};
use reservo_engine::BookingCoordinator;
use sha2::Sha256;
use std::sync::Arc;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted clock skew between the signature timestamp and now.
const MAX_SKEW_SECS: i64 = 300;

/// Ingress failure surfaced to the webhook endpoint.
#[derive(Debug, Error)]
pub enum WebhookIngressError {
    /// Header missing or malformed.
    #[error("malformed signature header")]
    MalformedSignature,
    /// Timestamp outside the accepted skew.
    #[error("signature timestamp outside tolerance")]
    StaleTimestamp,
    /// HMAC did not verify.
    #[error("signature verification failed")]
    BadSignature,
    /// Event body unusable.
    #[error("malformed event payload: {0}")]
    MalformedPayload(String),
    /// Downstream handling failed.
    #[error(transparent)]
    Handling(#[from] CoreError),
    /// Persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Acknowledgement returned to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressResponse {
    /// The event reached us.
    pub received: bool,
    /// Handlers actually ran (false for deduplicated replays).
    pub processed: bool,
}

/// Verifies, deduplicates, and routes provider callbacks.
pub struct WebhookIngress {
    dedup: Arc<dyn WebhookDedupStore>,
    dispatches: Arc<dyn DispatchStore>,
    coordinator: Arc<BookingCoordinator>,
    clock: SharedClock,
    secret: Vec<u8>,
}

impl WebhookIngress {
    /// Wire up the ingress with the provider's shared signing secret.
    #[must_use]
    pub fn new(
        dedup: Arc<dyn WebhookDedupStore>,
        dispatches: Arc<dyn DispatchStore>,
        coordinator: Arc<BookingCoordinator>,
        clock: SharedClock,
        secret: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            dedup,
            dispatches,
            coordinator,
            clock,
            secret: secret.into(),
        }
    }

    /// Verify the `X-Signature` header against the raw body.
    ///
    /// # Errors
    ///
    /// Returns the specific verification failure; callers map all of them
    /// to 401 without detail.
    pub fn verify(&self, header: &str, body: &[u8]) -> Result<(), WebhookIngressError> {
        let (timestamp, signature) = parse_signature_header(header)?;

        let now = self.clock.now().timestamp();
        if (now - timestamp).abs() > MAX_SKEW_SECS {
            return Err(WebhookIngressError::StaleTimestamp);
        }

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| WebhookIngressError::BadSignature)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        let expected = mac.finalize().into_bytes();

        let provided = hex::decode(signature)
            .map_err(|_| WebhookIngressError::MalformedSignature)?;
        if !constant_time_eq(&expected, &provided) {
            metrics::counter!("webhook.bad_signature").increment(1);
            return Err(WebhookIngressError::BadSignature);
        }
        Ok(())
    }

    /// Handle a verified event. Replays of `(provider, event id)` are
    /// acknowledged without re-invoking any handler.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookIngressError`] when the payload is unusable or a
    /// handler fails; the provider retries in that case.
    pub async fn handle(
        &self,
        provider: &str,
        body: &[u8],
    ) -> Result<IngressResponse, WebhookIngressError> {
        let event: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| WebhookIngressError::MalformedPayload(e.to_string()))?;
        let event_id = string_field(&event, "id")
            .ok_or_else(|| WebhookIngressError::MalformedPayload("missing id".to_string()))?;
        let event_type = string_field(&event, "type")
            .ok_or_else(|| WebhookIngressError::MalformedPayload("missing type".to_string()))?;

        let first_arrival = self
            .dedup
            .record(provider, &event_id, self.clock.now())
            .await?;
        if !first_arrival {
            tracing::debug!(provider, event_id, "webhook replay deduplicated");
            return Ok(IngressResponse {
                received: true,
                processed: false,
            });
        }

        self.route(&event_type, &event).await?;
        metrics::counter!("webhook.processed", "event_type" => event_type).increment(1);
        Ok(IngressResponse {
            received: true,
            processed: true,
        })
    }

    async fn route(
        &self,
        event_type: &str,
        event: &serde_json::Value,
    ) -> Result<(), WebhookIngressError> {
        match event_type {
            "payment.succeeded" => {
                let (tenant_id, booking_id) = booking_ref(event)?;
                self.coordinator.confirm_payment(tenant_id, booking_id).await?;
                Ok(())
            }
            "payment.failed" => {
                let (tenant_id, booking_id) = booking_ref(event)?;
                self.coordinator.fail_payment(tenant_id, booking_id).await?;
                Ok(())
            }
            "setup.confirmed" => {
                // Payment-method attachment lives with the PSP integration;
                // the engine only acknowledges it.
                tracing::info!(
                    customer = %event.pointer("/data/customerId").cloned().unwrap_or_default(),
                    "payment method setup confirmed"
                );
                Ok(())
            }
            "refund.succeeded" => {
                let (tenant_id, booking_id) = booking_ref(event)?;
                tracing::info!(
                    tenant = %tenant_id,
                    booking = %booking_id,
                    "refund settled by provider"
                );
                Ok(())
            }
            "delivery.updated" => self.apply_delivery_status(event).await,
            other => {
                tracing::debug!(event_type = other, "unrecognized webhook event ignored");
                Ok(())
            }
        }
    }

    async fn apply_delivery_status(
        &self,
        event: &serde_json::Value,
    ) -> Result<(), WebhookIngressError> {
        let external_id = event
            .pointer("/data/externalId")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                WebhookIngressError::MalformedPayload("missing data.externalId".to_string())
            })?;
        let status = event
            .pointer("/data/status")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("delivered");

        let (target, delivered_at) = match status {
            "delivered" => (DispatchStatus::Delivered, Some(self.clock.now())),
            "failed" | "bounced" => (DispatchStatus::Failed, None),
            other => {
                tracing::debug!(status = other, "delivery status ignored");
                return Ok(());
            }
        };

        let matched = self
            .dispatches
            .update_by_external_id(external_id, target, delivered_at)
            .await?;
        if !matched {
            tracing::warn!(external_id, "delivery status matched no dispatch row");
        }
        Ok(())
    }
}

fn parse_signature_header(header: &str) -> Result<(i64, &str), WebhookIngressError> {
    let mut timestamp = None;
    let mut signature = None;
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signature = Some(value),
            _ => {}
        }
    }
    match (timestamp, signature) {
        (Some(t), Some(v1)) => Ok((t, v1)),
        _ => Err(WebhookIngressError::MalformedSignature),
    }
}

fn string_field(event: &serde_json::Value, field: &str) -> Option<String> {
    event
        .get(field)
        .and_then(serde_json::Value::as_str)
        .map(ToString::to_string)
}

fn booking_ref(event: &serde_json::Value) -> Result<(TenantId, BookingId), WebhookIngressError> {
    let tenant = event
        .pointer("/data/tenantId")
        .and_then(|v| serde_json::from_value::<TenantId>(v.clone()).ok())
        .ok_or_else(|| {
            WebhookIngressError::MalformedPayload("missing data.tenantId".to_string())
        })?;
    let booking = event
        .pointer("/data/bookingId")
        .and_then(|v| serde_json::from_value::<BookingId>(v.clone()).ok())
        .ok_or_else(|| {
            WebhookIngressError::MalformedPayload("missing data.bookingId".to_string())
        })?;
    Ok((tenant, booking))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    #[test]
    fn signature_header_parses_both_fields() {
        let (t, v1) = parse_signature_header("t=1710064800,v1=deadbeef").unwrap();
        assert_eq!(t, 1_710_064_800);
        assert_eq!(v1, "deadbeef");

        assert!(parse_signature_header("v1=deadbeef").is_err());
        assert!(parse_signature_header("t=notanumber,v1=x").is_err());
    }

    #[test]
    fn booking_ref_requires_both_ids() {
        let event = serde_json::json!({
            "data": { "tenantId": TenantId::nil(), "bookingId": BookingId::nil() }
        });
        assert!(booking_ref(&event).is_ok());

        let event = serde_json::json!({ "data": { "tenantId": TenantId::nil() } });
        assert!(booking_ref(&event).is_err());
    }
}
