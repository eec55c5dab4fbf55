//! PostgreSQL idempotency store (durable tier).
//!
//! `(key, tenant_id)` is the primary key, so the uniqueness invariant is a
//! property of the table, not of the callers. Transitions are
//! compare-and-set UPDATEs guarded on the current status, which also makes
//! the at-most-one-in-flight invariant a committed-state property.

use crate::gateway::map_sqlx_error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reservo_core::domain::idempotency::{
    IdempotencyRecord, IdempotencyStatus, RequestMeta, ResponseMeta, StageTimings,
};
use reservo_core::error::StoreError;
use reservo_core::ids::{SagaId, TenantId, TransactionId};
use reservo_core::stores::IdempotencyStore;
use sqlx::{PgPool, Row};

/// Durable idempotency store over a shared pool.
#[derive(Clone)]
pub struct PgIdempotencyStore {
    pool: PgPool,
}

impl PgIdempotencyStore {
    /// Create the store.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<IdempotencyRecord, StoreError> {
    let status: String = row.get("status");
    let request_meta: serde_json::Value = row.get("request_meta");
    let request_meta: RequestMeta = serde_json::from_value(request_meta)
        .map_err(|e| StoreError::Database(format!("corrupt request_meta: {e}")))?;
    let response_meta: Option<serde_json::Value> = row.get("response_meta");
    let response_meta = response_meta
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| StoreError::Database(format!("corrupt response_meta: {e}")))?;
    let timings: serde_json::Value = row.get("timings");
    let timings: StageTimings = serde_json::from_value(timings).unwrap_or_default();

    Ok(IdempotencyRecord {
        key: row.get("key"),
        tenant_id: TenantId(row.get("tenant_id")),
        fingerprint: row.get("fingerprint"),
        status: IdempotencyStatus::parse(&status)?,
        request_meta,
        response_meta,
        expires_at: row.get("expires_at"),
        retry_count: row.get("retry_count"),
        max_retries: row.get("max_retries"),
        saga_id: row.get::<Option<uuid::Uuid>, _>("saga_id").map(SagaId),
        transaction_id: row
            .get::<Option<uuid::Uuid>, _>("transaction_id")
            .map(TransactionId),
        timings,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    async fn get(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT key, tenant_id, fingerprint, status, request_meta, response_meta,
                   expires_at, retry_count, max_retries, saga_id, transaction_id,
                   timings, created_at, updated_at
            FROM idempotency_records
            WHERE key = $1 AND tenant_id = $2
            ",
        )
        .bind(key)
        .bind(tenant_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn insert(&self, record: &IdempotencyRecord) -> Result<bool, StoreError> {
        let request_meta = serde_json::to_value(&record.request_meta)
            .map_err(|e| StoreError::Database(format!("encode request_meta: {e}")))?;
        let timings = serde_json::to_value(record.timings)
            .map_err(|e| StoreError::Database(format!("encode timings: {e}")))?;

        let result = sqlx::query(
            r"
            INSERT INTO idempotency_records
                (key, tenant_id, fingerprint, status, request_meta, expires_at,
                 retry_count, max_retries, saga_id, transaction_id, timings,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12)
            ON CONFLICT (key, tenant_id) DO UPDATE SET
                fingerprint = EXCLUDED.fingerprint,
                status = EXCLUDED.status,
                request_meta = EXCLUDED.request_meta,
                response_meta = NULL,
                expires_at = EXCLUDED.expires_at,
                retry_count = 0,
                timings = EXCLUDED.timings,
                created_at = EXCLUDED.created_at,
                updated_at = EXCLUDED.updated_at
            WHERE idempotency_records.status = 'expired'
               OR idempotency_records.expires_at <= EXCLUDED.created_at
            ",
        )
        .bind(&record.key)
        .bind(record.tenant_id.0)
        .bind(&record.fingerprint)
        .bind(record.status.as_str())
        .bind(&request_meta)
        .bind(record.expires_at)
        .bind(record.retry_count)
        .bind(record.max_retries)
        .bind(record.saga_id.map(|s| s.0))
        .bind(record.transaction_id.map(|t| t.0))
        .bind(&timings)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn transition(
        &self,
        tenant_id: TenantId,
        key: &str,
        from: IdempotencyStatus,
        to: IdempotencyStatus,
        response: Option<&ResponseMeta>,
        timings: StageTimings,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        if !from.can_transition(to) {
            return Ok(false);
        }
        let response = response
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StoreError::Database(format!("encode response_meta: {e}")))?;
        let timings = serde_json::to_value(timings)
            .map_err(|e| StoreError::Database(format!("encode timings: {e}")))?;

        let result = sqlx::query(
            r"
            UPDATE idempotency_records
            SET status = $1,
                response_meta = COALESCE($2, response_meta),
                timings = $3,
                retry_count = retry_count + CASE WHEN $4 THEN 1 ELSE 0 END,
                updated_at = $5
            WHERE key = $6 AND tenant_id = $7 AND status = $8
            ",
        )
        .bind(to.as_str())
        .bind(&response)
        .bind(&timings)
        .bind(to == IdempotencyStatus::Failed)
        .bind(now)
        .bind(key)
        .bind(tenant_id.0)
        .bind(from.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_expired(
        &self,
        now: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r"
            DELETE FROM idempotency_records
            WHERE (key, tenant_id) IN (
                SELECT key, tenant_id FROM idempotency_records
                WHERE expires_at <= $1
                LIMIT $2
            )
            ",
        )
        .bind(now)
        .bind(i64::try_from(batch_size).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            tracing::debug!(deleted, "expired idempotency records swept");
            metrics::counter!("idempotency.swept").increment(deleted);
        }
        Ok(deleted)
    }

    async fn find_stale_processing(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<IdempotencyRecord>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT key, tenant_id, fingerprint, status, request_meta, response_meta,
                   expires_at, retry_count, max_retries, saga_id, transaction_id,
                   timings, created_at, updated_at
            FROM idempotency_records
            WHERE status = 'processing' AND updated_at < $1
            ORDER BY updated_at
            LIMIT $2
            ",
        )
        .bind(older_than)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.iter().map(row_to_record).collect()
    }
}
