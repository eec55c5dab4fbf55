//! Saga execution and distributed-transaction participant records.

use crate::error::StoreError;
use crate::ids::{SagaId, TenantId, TransactionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a saga execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SagaStatus {
    /// Steps are running.
    Executing,
    /// Every step finished.
    Completed,
    /// A step failed and at least one compensation also failed permanently.
    Failed,
    /// A step failed and all prior steps were compensated.
    Compensated,
}

impl SagaStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Compensated => "compensated",
        }
    }

    /// Parse from the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] for an unknown status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "executing" => Ok(Self::Executing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "compensated" => Ok(Self::Compensated),
            _ => Err(StoreError::Database(format!("invalid saga status: {s}"))),
        }
    }
}

/// Persisted progress of one saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaExecution {
    /// Saga id.
    pub saga_id: SagaId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Saga name (for example `booking-confirm`).
    pub name: String,
    /// Lifecycle state.
    pub status: SagaStatus,
    /// Step names in execution order.
    pub steps: Vec<String>,
    /// Names of steps that completed.
    pub completed_steps: Vec<String>,
    /// Per-step results, parallel to `completed_steps`.
    pub results: Vec<serde_json::Value>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last persisted transition.
    pub updated_at: DateTime<Utc>,
}

/// 2PC-style participant status for reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    /// Enlisted.
    Initiated,
    /// Prepare requested.
    Preparing,
    /// Prepared and holding.
    Prepared,
    /// Commit requested.
    Committing,
    /// Committed.
    Committed,
    /// Abort requested.
    Aborting,
    /// Aborted.
    Aborted,
    /// Compensation running.
    Compensating,
    /// Compensation finished.
    Compensated,
    /// Permanently failed.
    Failed,
}

impl ParticipantStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Preparing => "preparing",
            Self::Prepared => "prepared",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::Aborting => "aborting",
            Self::Aborted => "aborted",
            Self::Compensating => "compensating",
            Self::Compensated => "compensated",
            Self::Failed => "failed",
        }
    }

    /// Parse from the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] for an unknown status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "initiated" => Ok(Self::Initiated),
            "preparing" => Ok(Self::Preparing),
            "prepared" => Ok(Self::Prepared),
            "committing" => Ok(Self::Committing),
            "committed" => Ok(Self::Committed),
            "aborting" => Ok(Self::Aborting),
            "aborted" => Ok(Self::Aborted),
            "compensating" => Ok(Self::Compensating),
            "compensated" => Ok(Self::Compensated),
            "failed" => Ok(Self::Failed),
            _ => Err(StoreError::Database(format!("invalid participant status: {s}"))),
        }
    }

    /// Whether the participant reached a settled state.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Committed | Self::Aborted | Self::Compensated | Self::Failed)
    }
}

/// One participant of a distributed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionParticipant {
    /// Owning transaction context.
    pub transaction_id: TransactionId,
    /// Saga the context belongs to, if any.
    pub saga_id: Option<SagaId>,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Participant name (for example `inventory`, `payment`).
    pub participant: String,
    /// Position in the 2PC-style lifecycle.
    pub status: ParticipantStatus,
    /// Data needed to compensate this participant.
    pub compensation_data: Option<serde_json::Value>,
    /// Whether compensation ran to completion.
    pub compensation_completed: bool,
    /// When the context stops being reconcilable and is surfaced as stuck.
    pub expires_at: DateTime<Utc>,
    /// Last transition.
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saga_status_roundtrip() {
        for status in [
            SagaStatus::Executing,
            SagaStatus::Completed,
            SagaStatus::Failed,
            SagaStatus::Compensated,
        ] {
            assert_eq!(SagaStatus::parse(status.as_str()), Ok(status));
        }
    }

    #[test]
    fn participant_settled_states() {
        assert!(ParticipantStatus::Committed.is_settled());
        assert!(ParticipantStatus::Compensated.is_settled());
        assert!(!ParticipantStatus::Preparing.is_settled());
        assert!(!ParticipantStatus::Initiated.is_settled());
    }
}
