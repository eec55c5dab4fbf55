//! Abstract payment provider port.
//!
//! The engine never talks to a concrete PSP; it sees a gateway that issues
//! intents, captures, and refunds. Webhook callbacks advance the matching
//! saga (see [`crate::saga`]).

use async_trait::async_trait;
use reservo_core::ids::{BookingId, TenantId};
use thiserror::Error;

/// A payment provider failure.
#[derive(Debug, Clone, Error)]
#[error("payment provider error: {message}")]
pub struct ProviderFault {
    /// Whether retrying may help (5xx, timeout).
    pub retryable: bool,
    /// Provider-reported detail.
    pub message: String,
}

impl ProviderFault {
    /// A transient fault.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }

    /// A permanent fault (declined, invalid).
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }
}

/// An authorization held against a customer's payment method.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    /// Provider-side intent id.
    pub intent_id: String,
    /// Authorized amount in minor units.
    pub amount_minor: i64,
}

/// The PSP contract the engine depends on.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Authorize (hold) an amount for a booking.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderFault`] when the provider declines or fails.
    async fn authorize(
        &self,
        tenant_id: TenantId,
        booking_id: BookingId,
        amount_minor: i64,
    ) -> Result<PaymentIntent, ProviderFault>;

    /// Capture a previously authorized intent.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderFault`] when the provider declines or fails.
    async fn capture(&self, tenant_id: TenantId, intent_id: &str) -> Result<(), ProviderFault>;

    /// Refund (or void) an intent, fully or partially.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderFault`] when the provider declines or fails.
    async fn refund(
        &self,
        tenant_id: TenantId,
        intent_id: &str,
        amount_minor: i64,
    ) -> Result<(), ProviderFault>;
}
