//! PostgreSQL booking store: the transactional unit of work.
//!
//! A confirm command reserves capacity, inserts the booking, its items,
//! its outbox events, and the audit record in ONE transaction. Any item
//! failure rolls everything back, so capacity can never leak and no
//! orphaned rows survive. Transitions (cancel, expire, payment-confirm)
//! are symmetric.

use crate::gateway::{begin_with_isolation, map_sqlx_error, IsolationLevel};
use crate::inventory::apply_mutation;
use crate::outbox::append_in_tx;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reservo_core::domain::booking::{Booking, BookingChange, BookingItem, BookingStatus};
use reservo_core::domain::inventory::MutationKind;
use reservo_core::error::StoreError;
use reservo_core::ids::{BookingId, CustomerId, ResourceId, ServiceId, TenantId, TimeslotId};
use reservo_core::stores::booking::{
    BookingStore, ConfirmCommand, ConfirmOutcome, TransitionCommand, TransitionOutcome,
};
use sqlx::{PgPool, Postgres, Row, Transaction};

/// Booking store over a shared pool.
#[derive(Clone)]
pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    /// Create the store.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_booking(row: &sqlx::postgres::PgRow) -> Result<Booking, StoreError> {
    let status: String = row.get("status");
    Ok(Booking {
        id: BookingId(row.get("id")),
        tenant_id: TenantId(row.get("tenant_id")),
        customer_id: CustomerId(row.get("customer_id")),
        service_id: ServiceId(row.get("service_id")),
        start_at: row.get("start_at"),
        end_at: row.get("end_at"),
        status: BookingStatus::parse(&status)?,
        total_minor: row.get("total_minor"),
        idempotency_key: row.get("idempotency_key"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

const BOOKING_COLUMNS: &str = "id, tenant_id, customer_id, service_id, start_at, end_at, \
     status, total_minor, idempotency_key, expires_at, created_at, updated_at";

async fn insert_change(
    tx: &mut Transaction<'_, Postgres>,
    change: &BookingChange,
) -> Result<(), StoreError> {
    sqlx::query(
        r"
        INSERT INTO booking_changes
            (booking_id, old_status, new_status, old_start_at, new_start_at, reason, actor, changed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ",
    )
    .bind(change.booking_id.0)
    .bind(change.old_status.map(BookingStatus::as_str))
    .bind(change.new_status.as_str())
    .bind(change.old_start_at)
    .bind(change.new_start_at)
    .bind(&change.reason)
    .bind(&change.actor)
    .bind(change.changed_at)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn execute_confirm(&self, cmd: ConfirmCommand) -> Result<ConfirmOutcome, StoreError> {
        let mut tx = begin_with_isolation(&self.pool, IsolationLevel::ReadCommitted).await?;

        // Capacity first, in the caller's canonical lock order.
        let mut new_versions = Vec::with_capacity(cmd.items.len());
        for (index, item) in cmd.items.iter().enumerate() {
            let outcome = apply_mutation(
                &mut tx,
                cmd.tenant_id,
                item.timeslot_id,
                item.resource_id,
                MutationKind::Reserve(item.capacity),
                item.expected_version,
            )
            .await?;
            match outcome {
                reservo_core::domain::inventory::ReserveOutcome::Ok { new_version, .. } => {
                    new_versions.push((item.timeslot_id, new_version));
                }
                other => {
                    tx.rollback().await.map_err(map_sqlx_error)?;
                    return Ok(ConfirmOutcome::ItemFailed {
                        index,
                        outcome: other,
                    });
                }
            }
        }

        let booking = &cmd.booking;
        sqlx::query(&format!(
            "INSERT INTO bookings ({BOOKING_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        ))
        .bind(booking.id.0)
        .bind(booking.tenant_id.0)
        .bind(booking.customer_id.0)
        .bind(booking.service_id.0)
        .bind(booking.start_at)
        .bind(booking.end_at)
        .bind(booking.status.as_str())
        .bind(booking.total_minor)
        .bind(&booking.idempotency_key)
        .bind(booking.expires_at)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        for item in &cmd.items {
            sqlx::query(
                r"
                INSERT INTO booking_items (booking_id, timeslot_id, resource_id, reserved_capacity)
                VALUES ($1, $2, $3, $4)
                ",
            )
            .bind(booking.id.0)
            .bind(item.timeslot_id.0)
            .bind(item.resource_id.0)
            .bind(item.capacity)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        for event in &cmd.events {
            append_in_tx(&mut tx, cmd.tenant_id, event, booking.created_at).await?;
        }
        insert_change(&mut tx, &cmd.change).await?;

        tx.commit().await.map_err(map_sqlx_error)?;

        metrics::counter!("booking.confirmed").increment(1);
        tracing::info!(
            booking = %booking.id,
            tenant = %booking.tenant_id,
            status = booking.status.as_str(),
            items = cmd.items.len(),
            "booking committed"
        );

        Ok(ConfirmOutcome::Committed {
            booking: booking.clone(),
            new_versions,
        })
    }

    async fn execute_transition(
        &self,
        cmd: TransitionCommand,
    ) -> Result<TransitionOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // Lock the booking row first so concurrent transitions serialize.
        let row = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings \
             WHERE id = $1 AND tenant_id = $2 FOR UPDATE"
        ))
        .bind(cmd.booking_id.0)
        .bind(cmd.tenant_id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Err(StoreError::NotFound);
        };
        let current = row_to_booking(&row)?;
        if current.status != cmd.expect_status {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(TransitionOutcome::StatusConflict {
                current: current.status,
            });
        }

        for (index, item) in cmd.release_items.iter().enumerate() {
            let outcome = apply_mutation(
                &mut tx,
                cmd.tenant_id,
                item.timeslot_id,
                item.resource_id,
                MutationKind::Release(item.capacity),
                item.expected_version,
            )
            .await?;
            if !outcome.is_ok() {
                tx.rollback().await.map_err(map_sqlx_error)?;
                return Ok(TransitionOutcome::ItemFailed { index, outcome });
            }
        }

        let now = cmd.change.changed_at;
        let updated = sqlx::query(&format!(
            "UPDATE bookings \
             SET status = $1, updated_at = $2, \
                 expires_at = CASE WHEN $3 THEN NULL ELSE expires_at END \
             WHERE id = $4 AND tenant_id = $5 \
             RETURNING {BOOKING_COLUMNS}"
        ))
        .bind(cmd.new_status.as_str())
        .bind(now)
        .bind(cmd.clear_expiry)
        .bind(cmd.booking_id.0)
        .bind(cmd.tenant_id.0)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        let booking = row_to_booking(&updated)?;

        for event in &cmd.events {
            append_in_tx(&mut tx, cmd.tenant_id, event, now).await?;
        }
        insert_change(&mut tx, &cmd.change).await?;

        tx.commit().await.map_err(map_sqlx_error)?;

        tracing::info!(
            booking = %booking.id,
            from = cmd.expect_status.as_str(),
            to = cmd.new_status.as_str(),
            released_items = cmd.release_items.len(),
            "booking transition committed"
        );

        Ok(TransitionOutcome::Committed { booking })
    }

    async fn get(
        &self,
        tenant_id: TenantId,
        booking_id: BookingId,
    ) -> Result<Option<Booking>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(booking_id.0)
        .bind(tenant_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.as_ref().map(row_to_booking).transpose()
    }

    async fn items(
        &self,
        tenant_id: TenantId,
        booking_id: BookingId,
    ) -> Result<Vec<BookingItem>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT i.booking_id, i.timeslot_id, i.resource_id, i.reserved_capacity
            FROM booking_items i
            JOIN bookings b ON b.id = i.booking_id
            WHERE i.booking_id = $1 AND b.tenant_id = $2
            ",
        )
        .bind(booking_id.0)
        .bind(tenant_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows
            .iter()
            .map(|row| BookingItem {
                booking_id: BookingId(row.get("booking_id")),
                timeslot_id: TimeslotId(row.get("timeslot_id")),
                resource_id: ResourceId(row.get("resource_id")),
                reserved_capacity: row.get("reserved_capacity"),
            })
            .collect())
    }

    async fn find_by_idempotency_key(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<Booking>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings \
             WHERE tenant_id = $1 AND idempotency_key = $2 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(tenant_id.0)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.as_ref().map(row_to_booking).transpose()
    }

    async fn overlapping_active(
        &self,
        tenant_id: TenantId,
        customer_id: CustomerId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Booking>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings \
             WHERE tenant_id = $1 AND customer_id = $2 \
               AND status IN ('tentative', 'confirmed') \
               AND start_at < $4 AND end_at > $3"
        ))
        .bind(tenant_id.0)
        .bind(customer_id.0)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.iter().map(row_to_booking).collect()
    }

    async fn active_count(
        &self,
        tenant_id: TenantId,
        customer_id: CustomerId,
    ) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*) FROM bookings
            WHERE tenant_id = $1 AND customer_id = $2
              AND status IN ('tentative', 'confirmed')
            ",
        )
        .bind(tenant_id.0)
        .bind(customer_id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(count)
    }

    async fn find_expired_tentative(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Booking>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings \
             WHERE status = 'tentative' AND expires_at <= $1 \
             ORDER BY expires_at LIMIT $2"
        ))
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.iter().map(row_to_booking).collect()
    }

    async fn append_change(&self, change: &BookingChange) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        insert_change(&mut tx, change).await?;
        tx.commit().await.map_err(map_sqlx_error)
    }
}
