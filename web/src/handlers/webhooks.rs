//! Provider webhook endpoint.
//!
//! The body is consumed as raw bytes (the HMAC input), the `X-Signature`
//! header is verified before anything is parsed, and handling is bounded
//! by a processing budget.

use crate::error::ApiError;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use reservo_core::error::ErrorCode;
use reservo_dispatch::{IngressResponse, WebhookIngressError};
use std::time::Duration;

/// Header carrying the provider signature.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Processing budget per webhook.
const PROCESSING_BUDGET: Duration = Duration::from_secs(5);

/// Handler for `POST /v1/webhooks/{provider}`.
///
/// # Errors
///
/// 401 for any signature problem (without detail), 400 for unusable
/// payloads, 502 when a downstream handler fails (the provider retries).
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IngressResponse>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::new(ErrorCode::AuthenticationError, "missing signature"))?;

    state
        .ingress
        .verify(signature, &body)
        .map_err(|_| ApiError::new(ErrorCode::AuthenticationError, "signature rejected"))?;

    let handled = tokio::time::timeout(PROCESSING_BUDGET, state.ingress.handle(&provider, &body))
        .await
        .map_err(|_| ApiError::new(ErrorCode::ProviderError, "webhook processing timed out"))?;

    handled.map(Json).map_err(|err| match err {
        WebhookIngressError::MalformedPayload(detail) => {
            ApiError::bad_request(detail, Vec::new())
        }
        WebhookIngressError::Handling(core) => core.into(),
        other => {
            tracing::error!(error = %other, provider, "webhook handling failed");
            ApiError::new(ErrorCode::ProviderError, "webhook handling failed")
        }
    })
}
