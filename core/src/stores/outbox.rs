//! Outbox store seam.
//!
//! Rows are appended inside booking transactions (see
//! [`crate::stores::booking`]); this trait is the relay's claim-and-mark
//! surface plus a standalone append for non-booking state changes.

use crate::domain::outbox::{NewOutboxEvent, OutboxEvent};
use crate::error::StoreError;
use crate::ids::{OutboxEventId, TenantId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Queue-depth counters for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboxCounts {
    /// Rows waiting for a worker.
    pub pending: i64,
    /// Rows currently claimed.
    pub publishing: i64,
    /// Rows that exhausted their retry budget.
    pub deadletter: i64,
}

/// Durable event log drained by the relay.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Append one event outside a booking transaction (for example a
    /// permanent notification failure). Returns the new row id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn append(
        &self,
        tenant_id: TenantId,
        event: NewOutboxEvent,
    ) -> Result<OutboxEventId, StoreError>;

    /// Claim up to `limit` due pending rows for `worker`, marking them
    /// `publishing`. Implementations must skip rows locked by concurrent
    /// claimers (`FOR UPDATE SKIP LOCKED` semantics) and return rows in
    /// `created_at` order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn claim_batch(
        &self,
        worker: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxEvent>, StoreError>;

    /// Mark a claimed row published.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn mark_published(
        &self,
        id: OutboxEventId,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Record a failed attempt: bump `attempts`, set `next_attempt_at`,
    /// return the row to `pending`, or `deadletter` when the budget is
    /// exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn mark_failed(
        &self,
        id: OutboxEventId,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        deadletter: bool,
    ) -> Result<(), StoreError>;

    /// Return rows stuck in `publishing` since before `older_than` to
    /// `pending` (crashed worker recovery). Returns the number released.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn release_stale_claims(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Queue-depth counters.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn counts(&self) -> Result<OutboxCounts, StoreError>;
}
