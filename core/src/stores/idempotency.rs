//! Idempotency store seams: durable tier and advisory cache tier.

use crate::domain::idempotency::{
    IdempotencyRecord, IdempotencyStatus, ResponseMeta, StageTimings,
};
use crate::error::StoreError;
use crate::ids::TenantId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Durable idempotency record storage.
///
/// `(key, tenant)` is unique; at most one record per key is `pending` or
/// `processing` at any committed state. Both are enforced here, not by
/// callers.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Fetch a record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn get(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError>;

    /// Insert a new record. An existing expired record for `(key, tenant)`
    /// is replaced wholesale (the TTL elapsed; the key may be reused);
    /// a live record makes this return `false`, in which case the caller
    /// re-reads and re-runs the check protocol.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure other than the
    /// duplicate-key case.
    async fn insert(&self, record: &IdempotencyRecord) -> Result<bool, StoreError>;

    /// Compare-and-set transition `from -> to`. Returns `false` when the
    /// record is not currently in `from` (lost race) or the transition is
    /// illegal. On success updates `updated_at`, the timing columns, the
    /// cached response (when given), and bumps `retry_count` when `to` is
    /// `Failed`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn transition(
        &self,
        tenant_id: TenantId,
        key: &str,
        from: IdempotencyStatus,
        to: IdempotencyStatus,
        response: Option<&ResponseMeta>,
        timings: StageTimings,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Delete up to `batch_size` records with `expires_at <= now`, skipping
    /// in-flight ones. Returns the number deleted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn delete_expired(
        &self,
        now: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<u64, StoreError>;

    /// `processing` records older than `older_than`, for reconciliation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn find_stale_processing(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<IdempotencyRecord>, StoreError>;
}

/// Advisory fast tier in front of the durable store.
///
/// Failures here are logged and repaired asynchronously, never surfaced: the
/// durable tier is authoritative.
#[async_trait]
pub trait IdempotencyCache: Send + Sync {
    /// Fetch a cached record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on cache failure (callers fall back to the
    /// durable tier).
    async fn get(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError>;

    /// Store a record with a TTL.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on cache failure.
    async fn put(
        &self,
        record: &IdempotencyRecord,
        ttl: std::time::Duration,
    ) -> Result<(), StoreError>;

    /// Drop a record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on cache failure.
    async fn remove(&self, tenant_id: TenantId, key: &str) -> Result<(), StoreError>;
}
