//! Saga store seam.

use crate::domain::saga::{SagaExecution, TransactionParticipant};
use crate::error::StoreError;
use crate::ids::SagaId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Persisted saga executions and their 2PC-style participant records.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Insert a fresh execution.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn insert(&self, execution: &SagaExecution) -> Result<(), StoreError>;

    /// Persist execution progress (status, completed steps, results).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn update(&self, execution: &SagaExecution) -> Result<(), StoreError>;

    /// Fetch an execution.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn get(&self, saga_id: SagaId) -> Result<Option<SagaExecution>, StoreError>;

    /// Insert or update a participant record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn upsert_participant(
        &self,
        participant: &TransactionParticipant,
    ) -> Result<(), StoreError>;

    /// Participants of unsettled transactions whose `expires_at` has
    /// passed; this is the reconciliation surface for stuck transactions.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn find_stuck(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TransactionParticipant>, StoreError>;
}
