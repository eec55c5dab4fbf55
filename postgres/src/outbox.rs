//! PostgreSQL outbox store.
//!
//! The write path lives inside the booking transaction (see
//! [`append_in_tx`]); there is no standalone publish path. The read side
//! claims batches with `FOR UPDATE SKIP LOCKED` so concurrent relay
//! workers never double-claim a row.

use crate::gateway::map_sqlx_error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reservo_core::domain::outbox::{NewOutboxEvent, OutboxEvent, OutboxStatus};
use reservo_core::error::StoreError;
use reservo_core::ids::{OutboxEventId, TenantId};
use reservo_core::stores::outbox::{OutboxCounts, OutboxStore};
use sqlx::{PgPool, Postgres, Row, Transaction};

/// Outbox store over a shared pool.
#[derive(Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    /// Create the store.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Append one event inside an open transaction, inheriting its commit
/// fate. Returns the new row id.
pub(crate) async fn append_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    event: &NewOutboxEvent,
    now: DateTime<Utc>,
) -> Result<OutboxEventId, StoreError> {
    let id = OutboxEventId::new();
    sqlx::query(
        r"
        INSERT INTO outbox_events
            (id, tenant_id, event_type, aggregate_type, aggregate_id, payload,
             status, attempts, next_attempt_at, created_at, trace_id, correlation_id)
        VALUES ($1, $2, $3, $4, $5, $6, 'pending', 0, $7, $7, $8, $9)
        ",
    )
    .bind(id.0)
    .bind(tenant_id.0)
    .bind(&event.event_type)
    .bind(&event.aggregate_type)
    .bind(&event.aggregate_id)
    .bind(&event.payload)
    .bind(now)
    .bind(&event.trace_id)
    .bind(&event.correlation_id)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;

    metrics::counter!("outbox.appended", "event_type" => event.event_type.clone()).increment(1);
    Ok(id)
}

fn row_to_event(row: &sqlx::postgres::PgRow) -> Result<OutboxEvent, StoreError> {
    let status: String = row.get("status");
    Ok(OutboxEvent {
        id: OutboxEventId(row.get("id")),
        tenant_id: TenantId(row.get("tenant_id")),
        event_type: row.get("event_type"),
        aggregate_type: row.get("aggregate_type"),
        aggregate_id: row.get("aggregate_id"),
        payload: row.get("payload"),
        status: OutboxStatus::parse(&status)?,
        attempts: row.get("attempts"),
        last_error: row.get("last_error"),
        next_attempt_at: row.get("next_attempt_at"),
        created_at: row.get("created_at"),
        published_at: row.get("published_at"),
        trace_id: row.get("trace_id"),
        correlation_id: row.get("correlation_id"),
        claimed_by: row.get("claimed_by"),
        claimed_at: row.get("claimed_at"),
    })
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn append(
        &self,
        tenant_id: TenantId,
        event: NewOutboxEvent,
    ) -> Result<OutboxEventId, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let id = append_in_tx(&mut tx, tenant_id, &event, Utc::now()).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(id)
    }

    async fn claim_batch(
        &self,
        worker: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxEvent>, StoreError> {
        let rows = sqlx::query(
            r"
            UPDATE outbox_events
            SET status = 'publishing', claimed_by = $1, claimed_at = $2
            WHERE id IN (
                SELECT id FROM outbox_events
                WHERE status = 'pending' AND next_attempt_at <= $2
                ORDER BY created_at
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, tenant_id, event_type, aggregate_type, aggregate_id, payload,
                      status, attempts, last_error, next_attempt_at, created_at,
                      published_at, trace_id, correlation_id, claimed_by, claimed_at
            ",
        )
        .bind(worker)
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut events: Vec<OutboxEvent> =
            rows.iter().map(row_to_event).collect::<Result<_, _>>()?;
        // The UPDATE does not guarantee output order; restore insertion order.
        events.sort_by_key(|e| e.created_at);
        Ok(events)
    }

    async fn mark_published(
        &self,
        id: OutboxEventId,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE outbox_events
            SET status = 'published', published_at = $1, claimed_by = NULL, claimed_at = NULL
            WHERE id = $2
            ",
        )
        .bind(now)
        .bind(id.0)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        metrics::counter!("outbox.published").increment(1);
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: OutboxEventId,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        deadletter: bool,
    ) -> Result<(), StoreError> {
        let status = if deadletter { "deadletter" } else { "pending" };
        sqlx::query(
            r"
            UPDATE outbox_events
            SET status = $1, attempts = attempts + 1, last_error = $2,
                next_attempt_at = $3, claimed_by = NULL, claimed_at = NULL
            WHERE id = $4
            ",
        )
        .bind(status)
        .bind(error)
        .bind(next_attempt_at)
        .bind(id.0)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if deadletter {
            tracing::warn!(outbox_id = %id, error, "outbox event deadlettered");
            metrics::counter!("outbox.deadletter").increment(1);
        }
        Ok(())
    }

    async fn release_stale_claims(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE outbox_events
            SET status = 'pending', claimed_by = NULL, claimed_at = NULL
            WHERE status = 'publishing' AND claimed_at < $1
            ",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let released = result.rows_affected();
        if released > 0 {
            tracing::warn!(released, "stale outbox claims released");
        }
        Ok(released)
    }

    async fn counts(&self) -> Result<OutboxCounts, StoreError> {
        let row = sqlx::query(
            r"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'publishing') AS publishing,
                COUNT(*) FILTER (WHERE status = 'deadletter') AS deadletter
            FROM outbox_events
            ",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(OutboxCounts {
            pending: row.get("pending"),
            publishing: row.get("publishing"),
            deadletter: row.get("deadletter"),
        })
    }
}
