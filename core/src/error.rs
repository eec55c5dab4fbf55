//! Error taxonomy for the reservation engine.
//!
//! Errors surfaced to callers carry a stable [`ErrorCode`] with a fixed HTTP
//! mapping. Store-level failures are a separate [`StoreError`] so the engine
//! can distinguish retryable persistence faults (serialization failure,
//! deadlock) from domain outcomes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error codes surfaced on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Policy violation or malformed field; details carry per-field messages.
    ValidationError,
    /// Requested capacity unavailable at commit time.
    CapacityExceeded,
    /// Optimistic-concurrency conflict. Internal only: always retried or
    /// translated before reaching a caller.
    VersionMismatch,
    /// Customer already holds an overlapping active booking.
    DoubleBooking,
    /// Same idempotency key, different request body.
    IdempotencyConflictFingerprint,
    /// A request with the same idempotency key is in flight.
    IdempotencyProcessing,
    /// Resource missing, inactive, or outside business hours.
    ResourceUnavailable,
    /// Caller is not authenticated.
    AuthenticationError,
    /// Caller is authenticated but not allowed.
    AccessDenied,
    /// Too many requests.
    RateLimitExceeded,
    /// Downstream provider failure.
    ProviderError,
    /// Unhandled internal failure.
    InternalError,
}

impl ErrorCode {
    /// Stable wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::CapacityExceeded => "CAPACITY_EXCEEDED",
            Self::VersionMismatch => "VERSION_MISMATCH",
            Self::DoubleBooking => "DOUBLE_BOOKING",
            Self::IdempotencyConflictFingerprint => "IDEMPOTENCY_CONFLICT_FINGERPRINT",
            Self::IdempotencyProcessing => "IDEMPOTENCY_PROCESSING",
            Self::ResourceUnavailable => "RESOURCE_UNAVAILABLE",
            Self::AuthenticationError => "AUTHENTICATION_ERROR",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::ProviderError => "PROVIDER_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// HTTP status this code maps to.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::ValidationError => 422,
            Self::CapacityExceeded
            | Self::VersionMismatch
            | Self::DoubleBooking
            | Self::IdempotencyConflictFingerprint
            | Self::IdempotencyProcessing => 409,
            Self::ResourceUnavailable => 404,
            Self::AuthenticationError => 401,
            Self::AccessDenied => 403,
            Self::RateLimitExceeded => 429,
            Self::ProviderError => 502,
            Self::InternalError => 500,
        }
    }
}

/// One field-level validation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Field the message refers to (dotted path for nested fields).
    pub field: String,
    /// Human-readable message.
    pub message: String,
}

impl FieldError {
    /// Build a field error.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Persistence-layer failure.
///
/// Only [`StoreError::SerializationConflict`] is retryable from the store's
/// perspective; everything else either surfaces or maps to a domain outcome.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Generic database failure.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization failure or deadlock detected (SQLSTATE 40001 / 40P01).
    /// The transaction can be retried as a whole.
    #[error("serialization conflict: {0}")]
    SerializationConflict(String),

    /// Expected row was not found.
    #[error("row not found")]
    NotFound,

    /// A unique constraint rejected the write.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// Connection or statement timed out.
    #[error("statement timed out: {0}")]
    Timeout(String),
}

impl StoreError {
    /// Whether the whole enclosing transaction may be retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::SerializationConflict(_) | Self::Timeout(_))
    }
}

/// Engine-level error carrying a stable code.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Validation failed; every accumulated message is included.
    #[error("validation failed: {} error(s)", details.len())]
    Validation {
        /// Per-field messages.
        details: Vec<FieldError>,
    },

    /// Requested capacity is not available.
    #[error("capacity exceeded on timeslot (available {available})")]
    CapacityExceeded {
        /// Capacity still available on the contested slot.
        available: i32,
        /// Best-effort alternatives; empty on internal errors.
        suggestions: Vec<crate::domain::booking::SlotSuggestion>,
    },

    /// Customer already holds an overlapping active booking.
    #[error("customer has an overlapping active booking")]
    DoubleBooking,

    /// Same idempotency key seen with a different fingerprint.
    #[error("idempotency key reused with a different request body")]
    IdempotencyFingerprintConflict,

    /// A request with the same key is still processing.
    #[error("request with the same idempotency key is in flight")]
    IdempotencyProcessing {
        /// Suggested client wait before retrying, in milliseconds.
        retry_after_ms: u64,
    },

    /// Resource missing, inactive, or closed.
    #[error("resource unavailable: {reason}")]
    ResourceUnavailable {
        /// What made the resource unavailable.
        reason: String,
    },

    /// Rate limit tripped.
    #[error("rate limit exceeded")]
    RateLimited {
        /// Seconds the caller should wait.
        retry_after_secs: u64,
    },

    /// Downstream provider failed.
    #[error("provider error: {0}")]
    Provider(String),

    /// Persistence failure that could not be recovered locally.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The stable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { .. } => ErrorCode::ValidationError,
            Self::CapacityExceeded { .. } => ErrorCode::CapacityExceeded,
            Self::DoubleBooking => ErrorCode::DoubleBooking,
            Self::IdempotencyFingerprintConflict => ErrorCode::IdempotencyConflictFingerprint,
            Self::IdempotencyProcessing { .. } => ErrorCode::IdempotencyProcessing,
            Self::ResourceUnavailable { .. } => ErrorCode::ResourceUnavailable,
            Self::RateLimited { .. } => ErrorCode::RateLimitExceeded,
            Self::Provider(_) => ErrorCode::ProviderError,
            Self::Store(_) | Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Whether retrying the same request may succeed without changes.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::IdempotencyProcessing { .. } | Self::RateLimited { .. } | Self::Provider(_) => {
                true
            }
            Self::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Result alias used across the engine crates.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_spec_statuses() {
        assert_eq!(ErrorCode::ValidationError.http_status(), 422);
        assert_eq!(ErrorCode::CapacityExceeded.http_status(), 409);
        assert_eq!(ErrorCode::IdempotencyProcessing.http_status(), 409);
        assert_eq!(ErrorCode::RateLimitExceeded.http_status(), 429);
        assert_eq!(ErrorCode::ProviderError.http_status(), 502);
        assert_eq!(ErrorCode::InternalError.http_status(), 500);
    }

    #[test]
    fn only_serialization_conflicts_and_timeouts_retry() {
        assert!(StoreError::SerializationConflict("40001".into()).is_retryable());
        assert!(StoreError::Timeout("lock".into()).is_retryable());
        assert!(!StoreError::Database("boom".into()).is_retryable());
        assert!(!StoreError::UniqueViolation("pk".into()).is_retryable());
        assert!(!StoreError::NotFound.is_retryable());
    }

    #[test]
    fn core_error_reports_codes() {
        let err = CoreError::CapacityExceeded {
            available: 0,
            suggestions: Vec::new(),
        };
        assert_eq!(err.code(), ErrorCode::CapacityExceeded);
        assert_eq!(err.code().as_str(), "CAPACITY_EXCEEDED");

        let err = CoreError::Store(StoreError::Database("x".into()));
        assert_eq!(err.code(), ErrorCode::InternalError);
    }
}
