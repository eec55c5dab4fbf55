//! PostgreSQL inventory store.
//!
//! The single authority over `timeslots.available_capacity`. Every
//! mutation locks the row (`FOR UPDATE`), compares the caller's expected
//! version, validates the capacity bounds against the owning resource, and
//! bumps the integer version counter in the same UPDATE.

use crate::gateway::map_sqlx_error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reservo_core::domain::inventory::{
    AvailabilityProbe, AvailabilityReport, AvailableSlot, CapacityMutation, MutationKind,
    MutationResult, ReserveOutcome, Timeslot, TimeslotSeed, canonical_lock_order,
};
use reservo_core::error::StoreError;
use reservo_core::ids::{ResourceId, TenantId, TimeslotId};
use reservo_core::stores::InventoryStore;
use sqlx::{PgPool, Postgres, Row, Transaction};

/// Inventory store over a shared pool.
#[derive(Clone)]
pub struct PgInventoryStore {
    pool: PgPool,
}

impl PgInventoryStore {
    /// Create the store.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn mutate_single(
        &self,
        tenant_id: TenantId,
        timeslot_id: TimeslotId,
        resource_id: ResourceId,
        kind: MutationKind,
        expected_version: i64,
    ) -> Result<ReserveOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let outcome =
            apply_mutation(&mut tx, tenant_id, timeslot_id, resource_id, kind, expected_version)
                .await?;
        if outcome.is_ok() {
            tx.commit().await.map_err(map_sqlx_error)?;
        } else {
            tx.rollback().await.map_err(map_sqlx_error)?;
        }
        Ok(outcome)
    }
}

/// Apply one capacity mutation inside an open transaction.
///
/// Shared by the inventory store and the booking unit of work so both
/// follow the identical lock/compare/write protocol.
pub(crate) async fn apply_mutation(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    timeslot_id: TimeslotId,
    resource_id: ResourceId,
    kind: MutationKind,
    expected_version: i64,
) -> Result<ReserveOutcome, StoreError> {
    let row = sqlx::query(
        r"
        SELECT t.available_capacity, t.version, r.total_capacity, r.status
        FROM timeslots t
        JOIN resources r ON r.id = t.resource_id
        WHERE t.id = $1 AND t.tenant_id = $2 AND t.resource_id = $3
        FOR UPDATE OF t
        ",
    )
    .bind(timeslot_id.0)
    .bind(tenant_id.0)
    .bind(resource_id.0)
    .fetch_optional(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;

    let Some(row) = row else {
        let resource_exists = sqlx::query(
            "SELECT 1 FROM resources WHERE id = $1 AND tenant_id = $2",
        )
        .bind(resource_id.0)
        .bind(tenant_id.0)
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;
        return Ok(if resource_exists.is_some() {
            ReserveOutcome::SlotNotFound
        } else {
            ReserveOutcome::ResourceNotFound
        });
    };

    let current_capacity: i32 = row.get("available_capacity");
    let current_version: i64 = row.get("version");
    let total_capacity: i32 = row.get("total_capacity");
    let resource_status: String = row.get("status");

    if resource_status != "active" {
        return Ok(ReserveOutcome::BusinessRuleViolation {
            reason: format!("resource is {resource_status}"),
        });
    }

    if current_version != expected_version {
        metrics::counter!("inventory.version_mismatch").increment(1);
        return Ok(ReserveOutcome::VersionMismatch {
            current_version,
            current_capacity,
        });
    }

    let new_capacity = match kind {
        MutationKind::Reserve(delta) | MutationKind::Release(delta) if delta < 1 => {
            return Ok(ReserveOutcome::BusinessRuleViolation {
                reason: "delta must be at least 1".to_string(),
            });
        }
        MutationKind::Reserve(delta) => current_capacity - delta,
        MutationKind::Release(delta) => current_capacity + delta,
        MutationKind::SetCapacity(value) => value,
    };

    if new_capacity < 0 {
        return Ok(ReserveOutcome::CapacityExceeded {
            available: current_capacity,
        });
    }
    if new_capacity > total_capacity {
        return Ok(ReserveOutcome::BusinessRuleViolation {
            reason: format!(
                "capacity {new_capacity} would exceed the resource total of {total_capacity}"
            ),
        });
    }

    sqlx::query(
        r"
        UPDATE timeslots
        SET available_capacity = $1, version = version + 1, updated_at = NOW()
        WHERE id = $2
        ",
    )
    .bind(new_capacity)
    .bind(timeslot_id.0)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;

    Ok(ReserveOutcome::Ok {
        new_capacity,
        new_version: current_version + 1,
    })
}

fn row_to_available_slot(row: &sqlx::postgres::PgRow) -> AvailableSlot {
    AvailableSlot {
        timeslot: Timeslot {
            id: TimeslotId(row.get("id")),
            tenant_id: TenantId(row.get("tenant_id")),
            resource_id: ResourceId(row.get("resource_id")),
            start_at: row.get("start_at"),
            end_at: row.get("end_at"),
            available_capacity: row.get("available_capacity"),
            version: row.get("version"),
            updated_at: row.get("updated_at"),
        },
        total_capacity: row.get("total_capacity"),
    }
}

#[async_trait]
impl InventoryStore for PgInventoryStore {
    async fn available_slots(
        &self,
        tenant_id: TenantId,
        resource_ids: &[ResourceId],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        min_capacity: Option<i32>,
    ) -> Result<Vec<AvailableSlot>, StoreError> {
        let ids: Vec<uuid::Uuid> = resource_ids.iter().map(|r| r.0).collect();
        let rows = sqlx::query(
            r"
            SELECT t.id, t.tenant_id, t.resource_id, t.start_at, t.end_at,
                   t.available_capacity, t.version, t.updated_at, r.total_capacity
            FROM timeslots t
            JOIN resources r ON r.id = t.resource_id
            WHERE t.tenant_id = $1
              AND t.resource_id = ANY($2)
              AND t.start_at >= $3
              AND t.end_at <= $4
              AND ($5::INT IS NULL OR t.available_capacity >= $5)
            ORDER BY t.resource_id, t.start_at
            ",
        )
        .bind(tenant_id.0)
        .bind(&ids)
        .bind(from)
        .bind(to)
        .bind(min_capacity)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.iter().map(row_to_available_slot).collect())
    }

    async fn timeslot(
        &self,
        tenant_id: TenantId,
        timeslot_id: TimeslotId,
    ) -> Result<Option<Timeslot>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT id, tenant_id, resource_id, start_at, end_at,
                   available_capacity, version, updated_at
            FROM timeslots
            WHERE id = $1 AND tenant_id = $2
            ",
        )
        .bind(timeslot_id.0)
        .bind(tenant_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(|row| Timeslot {
            id: TimeslotId(row.get("id")),
            tenant_id: TenantId(row.get("tenant_id")),
            resource_id: ResourceId(row.get("resource_id")),
            start_at: row.get("start_at"),
            end_at: row.get("end_at"),
            available_capacity: row.get("available_capacity"),
            version: row.get("version"),
            updated_at: row.get("updated_at"),
        }))
    }

    async fn batch_availability(
        &self,
        tenant_id: TenantId,
        probes: &[AvailabilityProbe],
    ) -> Result<Vec<AvailabilityReport>, StoreError> {
        if probes.is_empty() {
            return Ok(Vec::new());
        }
        let resource_ids: Vec<uuid::Uuid> = probes.iter().map(|p| p.resource_id.0).collect();
        let starts: Vec<DateTime<Utc>> = probes.iter().map(|p| p.start_at).collect();
        let ends: Vec<DateTime<Utc>> = probes.iter().map(|p| p.end_at).collect();

        let rows = sqlx::query(
            r"
            SELECT p.idx,
                   COALESCE(MIN(t.available_capacity), 0) AS available,
                   COUNT(t.id) AS slot_count
            FROM UNNEST($2::uuid[], $3::timestamptz[], $4::timestamptz[])
                 WITH ORDINALITY AS p(resource_id, start_at, end_at, idx)
            LEFT JOIN timeslots t
              ON t.tenant_id = $1
             AND t.resource_id = p.resource_id
             AND t.start_at >= p.start_at
             AND t.end_at <= p.end_at
            GROUP BY p.idx
            ORDER BY p.idx
            ",
        )
        .bind(tenant_id.0)
        .bind(&resource_ids)
        .bind(&starts)
        .bind(&ends)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut reports = Vec::with_capacity(probes.len());
        for row in &rows {
            let idx: i64 = row.get("idx");
            let available: i32 = row.get("available");
            let slot_count: i64 = row.get("slot_count");
            let probe = probes
                .get(usize::try_from(idx - 1).unwrap_or_default())
                .ok_or_else(|| StoreError::Database("probe index out of range".to_string()))?;
            reports.push(AvailabilityReport {
                resource_id: probe.resource_id,
                available,
                fits: slot_count > 0 && available >= probe.required,
            });
        }
        Ok(reports)
    }

    async fn reserve(
        &self,
        tenant_id: TenantId,
        timeslot_id: TimeslotId,
        resource_id: ResourceId,
        delta: i32,
        expected_version: i64,
    ) -> Result<ReserveOutcome, StoreError> {
        self.mutate_single(
            tenant_id,
            timeslot_id,
            resource_id,
            MutationKind::Reserve(delta),
            expected_version,
        )
        .await
    }

    async fn release(
        &self,
        tenant_id: TenantId,
        timeslot_id: TimeslotId,
        resource_id: ResourceId,
        delta: i32,
        expected_version: i64,
    ) -> Result<ReserveOutcome, StoreError> {
        self.mutate_single(
            tenant_id,
            timeslot_id,
            resource_id,
            MutationKind::Release(delta),
            expected_version,
        )
        .await
    }

    async fn set_capacity(
        &self,
        tenant_id: TenantId,
        timeslot_id: TimeslotId,
        resource_id: ResourceId,
        value: i32,
        expected_version: i64,
    ) -> Result<ReserveOutcome, StoreError> {
        self.mutate_single(
            tenant_id,
            timeslot_id,
            resource_id,
            MutationKind::SetCapacity(value),
            expected_version,
        )
        .await
    }

    async fn bulk_mutate(
        &self,
        tenant_id: TenantId,
        mut mutations: Vec<CapacityMutation>,
    ) -> Result<Vec<MutationResult>, StoreError> {
        canonical_lock_order(&mut mutations);

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut results = Vec::with_capacity(mutations.len());
        for mutation in &mutations {
            let outcome = apply_mutation(
                &mut tx,
                tenant_id,
                mutation.timeslot_id,
                mutation.resource_id,
                mutation.kind,
                mutation.expected_version,
            )
            .await?;
            let failed = !outcome.is_ok();
            results.push(MutationResult {
                timeslot_id: mutation.timeslot_id,
                outcome,
            });
            if failed {
                tx.rollback().await.map_err(map_sqlx_error)?;
                return Ok(results);
            }
        }
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(results)
    }

    async fn create_timeslots(
        &self,
        tenant_id: TenantId,
        resource_id: ResourceId,
        seeds: &[TimeslotSeed],
    ) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut written = 0u64;
        for seed in seeds {
            let result = sqlx::query(
                r"
                INSERT INTO timeslots (id, tenant_id, resource_id, start_at, end_at, available_capacity)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (tenant_id, resource_id, start_at, end_at)
                DO UPDATE SET available_capacity = EXCLUDED.available_capacity,
                              version = timeslots.version + 1,
                              updated_at = NOW()
                ",
            )
            .bind(TimeslotId::new().0)
            .bind(tenant_id.0)
            .bind(resource_id.0)
            .bind(seed.start_at)
            .bind(seed.end_at)
            .bind(seed.capacity)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
            written += result.rows_affected();
        }
        tx.commit().await.map_err(map_sqlx_error)?;

        tracing::debug!(
            tenant = %tenant_id,
            resource = %resource_id,
            rows = written,
            "timeslots upserted"
        );
        Ok(written)
    }

    async fn cleanup_expired(
        &self,
        tenant_id: TenantId,
        before: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r"
            DELETE FROM timeslots
            WHERE id IN (
                SELECT id FROM timeslots
                WHERE tenant_id = $1 AND end_at < $2
                LIMIT $3
            )
            ",
        )
        .bind(tenant_id.0)
        .bind(before)
        .bind(i64::try_from(batch_size).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            tracing::info!(tenant = %tenant_id, deleted, "expired timeslots removed");
            metrics::counter!("inventory.slots_cleaned").increment(deleted);
        }
        Ok(deleted)
    }
}
