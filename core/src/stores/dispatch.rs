//! Notification dispatch store seam.

use crate::domain::notification::{DispatchStatus, NewDispatch, NotificationDispatch};
use crate::error::StoreError;
use crate::ids::DispatchId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Durable dispatch rows. The in-memory queues are a hint; these rows are
/// the source of truth for what must be delivered.
#[async_trait]
pub trait DispatchStore: Send + Sync {
    /// Insert dispatch rows, ignoring duplicates of the
    /// `(outbox_event_id, channel, recipient_id)` key. Returns how many
    /// rows were actually inserted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn insert_many(&self, dispatches: &[NewDispatch]) -> Result<u64, StoreError>;

    /// Claim up to `limit` due pending rows, moving them to `sending`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn claim_due(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationDispatch>, StoreError>;

    /// Transition a dispatch row. Implementations enforce the status
    /// machine (one-way except `pending -> cancelled` and `sending ->
    /// pending`); an illegal transition returns `false` and changes
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    #[allow(clippy::too_many_arguments)] // Transition surface mirrors the row
    async fn mark(
        &self,
        id: DispatchId,
        status: DispatchStatus,
        external_id: Option<&str>,
        error: Option<&str>,
        next_attempt_at: Option<DateTime<Utc>>,
        bump_attempts: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Update the row matching a provider message id from a delivery-status
    /// callback. Returns `false` when no row matches.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn update_by_external_id(
        &self,
        external_id: &str,
        status: DispatchStatus,
        delivered_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError>;

    /// Expire pending rows whose `expires_at` has passed. Returns the
    /// number expired.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Fetch one dispatch row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn get(&self, id: DispatchId) -> Result<Option<NotificationDispatch>, StoreError>;
}
