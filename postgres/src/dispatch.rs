//! PostgreSQL notification dispatch store.
//!
//! Inserts use `ON CONFLICT DO NOTHING` on the
//! `(outbox_event_id, channel, recipient_id)` key: a relay crash between
//! translating an outbox row and marking it published re-runs the
//! translation without producing duplicate dispatches.

use crate::gateway::map_sqlx_error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reservo_core::domain::notification::{
    Channel, DispatchStatus, NewDispatch, NotificationDispatch, Priority,
};
use reservo_core::error::StoreError;
use reservo_core::ids::{DispatchId, OutboxEventId, TenantId};
use reservo_core::stores::DispatchStore;
use sqlx::{PgPool, Row};

/// Dispatch store over a shared pool.
#[derive(Clone)]
pub struct PgDispatchStore {
    pool: PgPool,
}

impl PgDispatchStore {
    /// Create the store.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const DISPATCH_COLUMNS: &str = "id, outbox_event_id, tenant_id, channel, status, recipient, \
     recipient_id, template_type, variables, priority, attempts, next_attempt_at, \
     external_id, delivered_at, expires_at, last_error, created_at, updated_at";

fn row_to_dispatch(row: &sqlx::postgres::PgRow) -> Result<NotificationDispatch, StoreError> {
    let channel: String = row.get("channel");
    let status: String = row.get("status");
    let priority: String = row.get("priority");
    Ok(NotificationDispatch {
        id: DispatchId(row.get("id")),
        outbox_event_id: row
            .get::<Option<uuid::Uuid>, _>("outbox_event_id")
            .map(OutboxEventId),
        tenant_id: TenantId(row.get("tenant_id")),
        channel: Channel::parse(&channel)?,
        status: DispatchStatus::parse(&status)?,
        recipient: row.get("recipient"),
        recipient_id: row.get("recipient_id"),
        template_type: row.get("template_type"),
        variables: row.get("variables"),
        priority: Priority::parse(&priority)?,
        attempts: row.get("attempts"),
        next_attempt_at: row.get("next_attempt_at"),
        external_id: row.get("external_id"),
        delivered_at: row.get("delivered_at"),
        expires_at: row.get("expires_at"),
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl DispatchStore for PgDispatchStore {
    async fn insert_many(&self, dispatches: &[NewDispatch]) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut inserted = 0u64;
        for dispatch in dispatches {
            let result = sqlx::query(
                r"
                INSERT INTO notification_dispatches
                    (id, outbox_event_id, tenant_id, channel, status, recipient,
                     recipient_id, template_type, variables, priority, expires_at)
                VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7, $8, $9, $10)
                ON CONFLICT (outbox_event_id, channel, recipient_id) DO NOTHING
                ",
            )
            .bind(DispatchId::new().0)
            .bind(dispatch.outbox_event_id.map(|id| id.0))
            .bind(dispatch.tenant_id.0)
            .bind(dispatch.channel.as_str())
            .bind(&dispatch.recipient)
            .bind(&dispatch.recipient_id)
            .bind(&dispatch.template_type)
            .bind(&dispatch.variables)
            .bind(dispatch.priority.as_str())
            .bind(dispatch.expires_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
            inserted += result.rows_affected();
        }
        tx.commit().await.map_err(map_sqlx_error)?;

        metrics::counter!("dispatch.inserted").increment(inserted);
        Ok(inserted)
    }

    async fn claim_due(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationDispatch>, StoreError> {
        let rows = sqlx::query(&format!(
            "UPDATE notification_dispatches \
             SET status = 'sending', updated_at = $1 \
             WHERE id IN ( \
                 SELECT id FROM notification_dispatches \
                 WHERE status = 'pending' AND next_attempt_at <= $1 \
                   AND (expires_at IS NULL OR expires_at > $1) \
                 ORDER BY CASE priority WHEN 'URGENT' THEN 4 WHEN 'HIGH' THEN 3 \
                          WHEN 'NORMAL' THEN 2 ELSE 1 END DESC, next_attempt_at \
                 LIMIT $2 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {DISPATCH_COLUMNS}"
        ))
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.iter().map(row_to_dispatch).collect()
    }

    async fn mark(
        &self,
        id: DispatchId,
        status: DispatchStatus,
        external_id: Option<&str>,
        error: Option<&str>,
        next_attempt_at: Option<DateTime<Utc>>,
        bump_attempts: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        // The legal source states for the requested target, per the status
        // machine (one-way except pending->cancelled and sending->pending).
        let from_states: &[&str] = match status {
            DispatchStatus::Sending => &["pending"],
            DispatchStatus::Sent => &["sending"],
            DispatchStatus::Failed => &["sending", "sent"],
            DispatchStatus::Pending => &["sending"],
            DispatchStatus::Cancelled | DispatchStatus::Expired => &["pending"],
            DispatchStatus::Delivered => &["sent"],
        };

        let result = sqlx::query(
            r"
            UPDATE notification_dispatches
            SET status = $1,
                external_id = COALESCE($2, external_id),
                last_error = COALESCE($3, last_error),
                next_attempt_at = COALESCE($4, next_attempt_at),
                attempts = attempts + CASE WHEN $5 THEN 1 ELSE 0 END,
                delivered_at = CASE WHEN $1 = 'delivered' THEN $6 ELSE delivered_at END,
                updated_at = $6
            WHERE id = $7 AND status = ANY($8)
            ",
        )
        .bind(status.as_str())
        .bind(external_id)
        .bind(error)
        .bind(next_attempt_at)
        .bind(bump_attempts)
        .bind(now)
        .bind(id.0)
        .bind(from_states)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_by_external_id(
        &self,
        external_id: &str,
        status: DispatchStatus,
        delivered_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE notification_dispatches
            SET status = $1, delivered_at = COALESCE($2, delivered_at), updated_at = NOW()
            WHERE external_id = $3 AND status = 'sent'
            ",
        )
        .bind(status.as_str())
        .bind(delivered_at)
        .bind(external_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE notification_dispatches
            SET status = 'expired', updated_at = $1
            WHERE status = 'pending' AND expires_at IS NOT NULL AND expires_at <= $1
            ",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn get(&self, id: DispatchId) -> Result<Option<NotificationDispatch>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {DISPATCH_COLUMNS} FROM notification_dispatches WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.as_ref().map(row_to_dispatch).transpose()
    }
}
