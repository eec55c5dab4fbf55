//! HTTP error bridging.
//!
//! [`ApiError`] carries the engine's stable code and renders the
//! `{code, message, details[]}` body every endpoint shares. Internal
//! causes are logged, never exposed.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use reservo_core::domain::booking::SlotSuggestion;
use reservo_core::error::{CoreError, ErrorCode, FieldError};
use serde::Serialize;

/// Error surfaced by a handler.
#[derive(Debug)]
pub struct ApiError {
    code: ErrorCode,
    message: String,
    details: Vec<FieldError>,
    suggestions: Vec<SlotSuggestion>,
    retry_after_secs: Option<u64>,
    status_override: Option<StatusCode>,
}

impl ApiError {
    /// Build an error with the given code and message.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Vec::new(),
            suggestions: Vec::new(),
            retry_after_secs: None,
            status_override: None,
        }
    }

    /// A 400 validation failure for malformed query/body input (the public
    /// endpoints promise 400 for parameter problems, not 422).
    #[must_use]
    pub fn bad_request(message: impl Into<String>, details: Vec<FieldError>) -> Self {
        Self {
            code: ErrorCode::ValidationError,
            message: message.into(),
            details,
            suggestions: Vec::new(),
            retry_after_secs: None,
            status_override: Some(StatusCode::BAD_REQUEST),
        }
    }

    /// Attach a `Retry-After` hint.
    #[must_use]
    pub const fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }

}

/// Shared error body.
#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    details: Vec<FieldError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    suggestions: Vec<SlotSuggestion>,
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let code = err.code();
        match err {
            CoreError::Validation { details } => Self {
                code,
                message: "validation failed".to_string(),
                details,
                suggestions: Vec::new(),
                retry_after_secs: None,
                status_override: None,
            },
            CoreError::CapacityExceeded { available, suggestions } => Self {
                code,
                message: format!("requested capacity unavailable ({available} left)"),
                details: Vec::new(),
                suggestions,
                retry_after_secs: None,
                status_override: None,
            },
            CoreError::IdempotencyProcessing { retry_after_ms } => Self {
                code,
                message: "a request with this idempotency key is in flight".to_string(),
                details: Vec::new(),
                suggestions: Vec::new(),
                retry_after_secs: Some(retry_after_ms.div_ceil(1000).max(1)),
                status_override: None,
            },
            CoreError::RateLimited { retry_after_secs } => Self {
                code,
                message: "rate limit exceeded".to_string(),
                details: Vec::new(),
                suggestions: Vec::new(),
                retry_after_secs: Some(retry_after_secs.max(1)),
                status_override: None,
            },
            CoreError::Store(inner) => {
                tracing::error!(error = %inner, "store failure surfaced as internal error");
                Self::new(ErrorCode::InternalError, "internal error")
            }
            CoreError::Internal(detail) => {
                tracing::error!(detail, "internal error");
                Self::new(ErrorCode::InternalError, "internal error")
            }
            other => Self::new(code, other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_override.unwrap_or_else(|| {
            StatusCode::from_u16(self.code.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        });
        let body = ErrorBody {
            code: self.code.as_str(),
            message: self.message,
            details: self.details,
            suggestions: self.suggestions,
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_stable_codes() {
        let err: ApiError = CoreError::DoubleBooking.into();
        assert_eq!(err.code, ErrorCode::DoubleBooking);

        let err: ApiError = CoreError::IdempotencyProcessing { retry_after_ms: 100 }.into();
        assert_eq!(err.code, ErrorCode::IdempotencyProcessing);
        assert_eq!(err.retry_after_secs, Some(1));
    }

    #[test]
    fn internal_detail_is_not_exposed() {
        let err: ApiError = CoreError::Internal("pool exploded at 10.0.0.3".into()).into();
        assert_eq!(err.message, "internal error");
    }
}
