//! Inventory store seam.

use crate::domain::inventory::{
    AvailabilityProbe, AvailabilityReport, AvailableSlot, CapacityMutation, MutationResult,
    ReserveOutcome, Timeslot, TimeslotSeed,
};
use crate::error::StoreError;
use crate::ids::{ResourceId, TenantId, TimeslotId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// The single authority over `Timeslot.available_capacity`.
///
/// Every mutation follows the same protocol: lock the row, compare the
/// caller's expected version, validate the capacity bounds, write and bump
/// the version. Version mismatch is an outcome, not an error: callers
/// decide whether to re-read and retry.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Read available slots for the given resources inside `[from, to)`,
    /// joined with the resource's total capacity, ordered by
    /// `(resource, start)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn available_slots(
        &self,
        tenant_id: TenantId,
        resource_ids: &[ResourceId],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        min_capacity: Option<i32>,
    ) -> Result<Vec<AvailableSlot>, StoreError>;

    /// Fetch one timeslot (current capacity and version), without locks.
    /// Callers use the returned version as the fence for a follow-up
    /// mutation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn timeslot(
        &self,
        tenant_id: TenantId,
        timeslot_id: TimeslotId,
    ) -> Result<Option<Timeslot>, StoreError>;

    /// Aggregate availability over whole ranges, without locks.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn batch_availability(
        &self,
        tenant_id: TenantId,
        probes: &[AvailabilityProbe],
    ) -> Result<Vec<AvailabilityReport>, StoreError>;

    /// Atomically decrement available capacity by `delta`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure; domain conditions are
    /// reported through [`ReserveOutcome`].
    async fn reserve(
        &self,
        tenant_id: TenantId,
        timeslot_id: TimeslotId,
        resource_id: ResourceId,
        delta: i32,
        expected_version: i64,
    ) -> Result<ReserveOutcome, StoreError>;

    /// Atomically increment available capacity by `delta`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn release(
        &self,
        tenant_id: TenantId,
        timeslot_id: TimeslotId,
        resource_id: ResourceId,
        delta: i32,
        expected_version: i64,
    ) -> Result<ReserveOutcome, StoreError>;

    /// Set available capacity to an absolute value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn set_capacity(
        &self,
        tenant_id: TenantId,
        timeslot_id: TimeslotId,
        resource_id: ResourceId,
        value: i32,
        expected_version: i64,
    ) -> Result<ReserveOutcome, StoreError>;

    /// Apply several mutations in canonical lock order. Stops at the first
    /// non-ok outcome and returns the partial result list; the caller must
    /// abort or compensate. Never commits a partial batch silently.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn bulk_mutate(
        &self,
        tenant_id: TenantId,
        mutations: Vec<CapacityMutation>,
    ) -> Result<Vec<MutationResult>, StoreError>;

    /// Idempotent upsert of timeslots keyed on `(tenant, resource, start,
    /// end)`; conflicts update capacity and bump the version. Returns the
    /// number of rows written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn create_timeslots(
        &self,
        tenant_id: TenantId,
        resource_id: ResourceId,
        seeds: &[TimeslotSeed],
    ) -> Result<u64, StoreError>;

    /// Delete slots with `end < before`, at most `batch_size` per call.
    /// Returns the number of rows deleted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn cleanup_expired(
        &self,
        tenant_id: TenantId,
        before: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<u64, StoreError>;
}
