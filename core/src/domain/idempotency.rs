//! Idempotency records.
//!
//! An idempotency record ties a client-supplied key and a request
//! fingerprint to a cached response or in-flight state. `(key, tenant)` is
//! unique, and at most one record per key is `pending` or `processing` at
//! any committed state.

use crate::error::StoreError;
use crate::ids::{SagaId, TenantId, TransactionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State machine of an idempotency record.
///
/// Legal transitions: `pending -> processing -> completed | failed ->
/// expired`, plus `processing -> cancelled` on explicit abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdempotencyStatus {
    /// Created, not yet picked up.
    Pending,
    /// A request is executing under this key.
    Processing,
    /// Finished; the cached response is authoritative.
    Completed,
    /// The request failed; retries may proceed while budget remains.
    Failed,
    /// TTL elapsed; the sweeper removes these.
    Expired,
    /// Explicitly aborted.
    Cancelled,
}

impl IdempotencyStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
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
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "expired" => Ok(Self::Expired),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(StoreError::Database(format!("invalid idempotency status: {s}"))),
        }
    }

    /// Whether `self -> to` is a legal transition.
    #[must_use]
    pub const fn can_transition(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
                | (Self::Processing, Self::Cancelled)
                | (Self::Completed, Self::Expired)
                | (Self::Failed, Self::Expired)
                | (Self::Failed, Self::Processing)
        )
    }

    /// Whether a request under this key is considered in flight.
    #[must_use]
    pub const fn is_in_flight(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

/// The semantically significant parts of the original request, kept for
/// fingerprint comparison and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMeta {
    /// HTTP method.
    pub method: String,
    /// Request URL (path + query).
    pub url: String,
    /// Content type of the body.
    pub content_type: String,
    /// Tenant the request was issued for.
    pub tenant_id: TenantId,
    /// Acting user, if authenticated.
    pub user: Option<String>,
    /// Request body.
    pub body: serde_json::Value,
}

/// The cached response replayed for duplicate requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    /// HTTP status of the original response.
    pub status: u16,
    /// Response body.
    pub body: serde_json::Value,
}

/// Timing breakdown recorded on every transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTimings {
    /// Milliseconds spent acquiring locks.
    pub lock_acquisition_ms: u64,
    /// Milliseconds spent in the database.
    pub database_ms: u64,
    /// Total processing milliseconds.
    pub processing_duration_ms: u64,
}

/// One idempotency record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyRecord {
    /// Client-supplied key.
    pub key: String,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// SHA-256 fingerprint of the canonical request.
    pub fingerprint: String,
    /// State machine position.
    pub status: IdempotencyStatus,
    /// Original request metadata.
    pub request_meta: RequestMeta,
    /// Cached response once completed.
    pub response_meta: Option<ResponseMeta>,
    /// When the record stops shielding duplicates.
    pub expires_at: DateTime<Utc>,
    /// Failed attempts so far.
    pub retry_count: i32,
    /// Retry budget.
    pub max_retries: i32,
    /// Saga driving this request, if any.
    pub saga_id: Option<SagaId>,
    /// Distributed transaction context, if any.
    pub transaction_id: Option<TransactionId>,
    /// Timing breakdown of the last transition.
    pub timings: StageTimings,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last transition timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Conflicts the check protocol can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdempotencyConflict {
    /// The record existed but its TTL had elapsed.
    KeyExpired,
    /// Same key, different request body.
    FingerprintMismatch,
    /// The record is in a state that admits no further attempts.
    InvalidState,
}

/// Result of the idempotency check protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    /// Whether the caller may proceed to execute the request.
    pub proceed: bool,
    /// Cached response to replay instead of executing.
    pub cached_response: Option<ResponseMeta>,
    /// Whether the caller should wait and re-poll.
    pub should_wait: bool,
    /// Suggested wait in milliseconds when `should_wait`.
    pub wait_ms: u64,
    /// Conflict detail, if any.
    pub conflict: Option<IdempotencyConflict>,
}

impl CheckOutcome {
    /// Plain go-ahead.
    #[must_use]
    pub const fn proceed() -> Self {
        Self {
            proceed: true,
            cached_response: None,
            should_wait: false,
            wait_ms: 0,
            conflict: None,
        }
    }

    /// Go-ahead after an expired record was swept aside.
    #[must_use]
    pub const fn proceed_expired() -> Self {
        Self {
            proceed: true,
            cached_response: None,
            should_wait: false,
            wait_ms: 0,
            conflict: Some(IdempotencyConflict::KeyExpired),
        }
    }

    /// Replay the cached response.
    #[must_use]
    pub const fn replay(response: ResponseMeta) -> Self {
        Self {
            proceed: false,
            cached_response: Some(response),
            should_wait: false,
            wait_ms: 0,
            conflict: None,
        }
    }

    /// A request with this key is in flight; wait.
    #[must_use]
    pub const fn wait(wait_ms: u64) -> Self {
        Self {
            proceed: false,
            cached_response: None,
            should_wait: true,
            wait_ms,
            conflict: None,
        }
    }

    /// Refuse with a conflict.
    #[must_use]
    pub const fn conflict(conflict: IdempotencyConflict) -> Self {
        Self {
            proceed: false,
            cached_response: None,
            should_wait: false,
            wait_ms: 0,
            conflict: Some(conflict),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for status in [
            IdempotencyStatus::Pending,
            IdempotencyStatus::Processing,
            IdempotencyStatus::Completed,
            IdempotencyStatus::Failed,
            IdempotencyStatus::Expired,
            IdempotencyStatus::Cancelled,
        ] {
            assert_eq!(IdempotencyStatus::parse(status.as_str()), Ok(status));
        }
    }

    #[test]
    fn transition_matrix() {
        use IdempotencyStatus as S;
        assert!(S::Pending.can_transition(S::Processing));
        assert!(S::Processing.can_transition(S::Completed));
        assert!(S::Processing.can_transition(S::Failed));
        assert!(S::Processing.can_transition(S::Cancelled));
        assert!(S::Failed.can_transition(S::Processing));
        assert!(S::Completed.can_transition(S::Expired));

        assert!(!S::Completed.can_transition(S::Processing));
        assert!(!S::Pending.can_transition(S::Completed));
        assert!(!S::Expired.can_transition(S::Processing));
        assert!(!S::Cancelled.can_transition(S::Processing));
    }

    #[test]
    fn in_flight_states() {
        assert!(IdempotencyStatus::Pending.is_in_flight());
        assert!(IdempotencyStatus::Processing.is_in_flight());
        assert!(!IdempotencyStatus::Completed.is_in_flight());
    }
}
