//! In-memory store implementations.
//!
//! One mutex-guarded world backs every seam so the cross-store invariants
//! (capacity vs. booking rows vs. outbox rows) hold exactly as they do in
//! Postgres: a confirm either commits everything or nothing. Fault
//! injection lets tests simulate serialization failures and deadlocks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reservo_core::domain::booking::{Booking, BookingChange, BookingItem, BookingStatus};
use reservo_core::domain::catalog::{
    BusinessHours, Customer, Holiday, Resource, ResourceTimeOff, Service,
};
use reservo_core::domain::idempotency::{
    IdempotencyRecord, IdempotencyStatus, ResponseMeta, StageTimings,
};
use reservo_core::domain::inventory::{
    AvailabilityProbe, AvailabilityReport, AvailableSlot, CapacityMutation, MutationKind,
    MutationResult, ReserveOutcome, Timeslot, TimeslotSeed, canonical_lock_order,
};
use reservo_core::domain::notification::{
    DispatchStatus, NewDispatch, NotificationDispatch, NotificationPreferences,
    NotificationTemplate,
};
use reservo_core::domain::outbox::{NewOutboxEvent, OutboxEvent, OutboxStatus};
use reservo_core::domain::saga::{SagaExecution, TransactionParticipant};
use reservo_core::error::StoreError;
use reservo_core::ids::{
    BookingId, CustomerId, DispatchId, OutboxEventId, ResourceId, SagaId, ServiceId, TenantId,
    TimeslotId, TransactionId,
};
use reservo_core::stores::booking::{
    BookingStore, ConfirmCommand, ConfirmOutcome, TransitionCommand, TransitionOutcome,
};
use reservo_core::stores::{
    CatalogStore, DispatchStore, IdempotencyCache, IdempotencyStore, InventoryStore, OutboxCounts,
    OutboxStore, SagaStore, WebhookDedupStore,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
struct World {
    resources: HashMap<ResourceId, Resource>,
    services: HashMap<ServiceId, Service>,
    capabilities: HashSet<(ResourceId, ServiceId)>,
    business_hours: Vec<BusinessHours>,
    holidays: Vec<Holiday>,
    time_off: Vec<ResourceTimeOff>,
    customers: HashMap<CustomerId, Customer>,
    templates: Vec<NotificationTemplate>,
    preferences: HashMap<(TenantId, CustomerId), NotificationPreferences>,

    timeslots: HashMap<TimeslotId, Timeslot>,
    bookings: HashMap<BookingId, Booking>,
    items: HashMap<BookingId, Vec<BookingItem>>,
    changes: Vec<BookingChange>,

    idempotency: HashMap<(String, TenantId), IdempotencyRecord>,
    outbox: Vec<OutboxEvent>,
    dispatches: Vec<NotificationDispatch>,
    sagas: HashMap<SagaId, SagaExecution>,
    participants: HashMap<(TransactionId, String), TransactionParticipant>,
    webhook_seen: HashSet<(String, String)>,

    confirm_faults: VecDeque<StoreError>,
}

/// Every store seam over one shared in-memory world.
#[derive(Clone, Default)]
pub struct InMemoryStores {
    world: Arc<Mutex<World>>,
}

impl InMemoryStores {
    /// Fresh, empty world.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ─── seeding ────────────────────────────────────────────────────────

    /// Seed a resource.
    pub fn add_resource(&self, resource: Resource) {
        self.world.lock().resources.insert(resource.id, resource);
    }

    /// Seed a service.
    pub fn add_service(&self, service: Service) {
        self.world.lock().services.insert(service.id, service);
    }

    /// Map a resource to a service.
    pub fn add_capability(&self, resource_id: ResourceId, service_id: ServiceId) {
        self.world.lock().capabilities.insert((resource_id, service_id));
    }

    /// Seed a business-hours row.
    pub fn add_business_hours(&self, row: BusinessHours) {
        self.world.lock().business_hours.push(row);
    }

    /// Seed a holiday.
    pub fn add_holiday(&self, holiday: Holiday) {
        self.world.lock().holidays.push(holiday);
    }

    /// Seed a time-off window.
    pub fn add_time_off(&self, row: ResourceTimeOff) {
        self.world.lock().time_off.push(row);
    }

    /// Seed a customer.
    pub fn add_customer(&self, customer: Customer) {
        self.world.lock().customers.insert(customer.id, customer);
    }

    /// Seed a notification template.
    pub fn add_template(&self, template: NotificationTemplate) {
        self.world.lock().templates.push(template);
    }

    /// Seed notification preferences.
    pub fn set_preferences(&self, preferences: NotificationPreferences) {
        self.world
            .lock()
            .preferences
            .insert((preferences.tenant_id, preferences.customer_id), preferences);
    }

    /// Seed a timeslot and return it.
    pub fn add_timeslot(
        &self,
        tenant_id: TenantId,
        resource_id: ResourceId,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        available_capacity: i32,
    ) -> Timeslot {
        let slot = Timeslot {
            id: TimeslotId::new(),
            tenant_id,
            resource_id,
            start_at,
            end_at,
            available_capacity,
            version: 1,
            updated_at: start_at,
        };
        self.world.lock().timeslots.insert(slot.id, slot.clone());
        slot
    }

    // ─── fault injection ────────────────────────────────────────────────

    /// Make the next `execute_confirm` fail with `error` before touching
    /// the world (simulates a serialization failure or deadlock).
    pub fn inject_confirm_fault(&self, error: StoreError) {
        self.world.lock().confirm_faults.push_back(error);
    }

    // ─── inspection ─────────────────────────────────────────────────────

    /// Snapshot a timeslot.
    #[must_use]
    pub fn timeslot(&self, id: TimeslotId) -> Option<Timeslot> {
        self.world.lock().timeslots.get(&id).cloned()
    }

    /// Snapshot all outbox rows.
    #[must_use]
    pub fn outbox_events(&self) -> Vec<OutboxEvent> {
        self.world.lock().outbox.clone()
    }

    /// Snapshot all dispatch rows.
    #[must_use]
    pub fn dispatch_rows(&self) -> Vec<NotificationDispatch> {
        self.world.lock().dispatches.clone()
    }

    /// Snapshot all bookings.
    #[must_use]
    pub fn all_bookings(&self) -> Vec<Booking> {
        self.world.lock().bookings.values().cloned().collect()
    }

    /// Snapshot the audit trail.
    #[must_use]
    pub fn audit_trail(&self) -> Vec<BookingChange> {
        self.world.lock().changes.clone()
    }

    /// Snapshot an idempotency record.
    #[must_use]
    pub fn idempotency_record(&self, tenant_id: TenantId, key: &str) -> Option<IdempotencyRecord> {
        self.world
            .lock()
            .idempotency
            .get(&(key.to_string(), tenant_id))
            .cloned()
    }
}

fn mutate_slot(
    world: &mut World,
    tenant_id: TenantId,
    timeslot_id: TimeslotId,
    resource_id: ResourceId,
    kind: MutationKind,
    expected_version: i64,
    now: DateTime<Utc>,
) -> ReserveOutcome {
    let Some(resource) = world.resources.get(&resource_id) else {
        return ReserveOutcome::ResourceNotFound;
    };
    if !resource.is_bookable() {
        return ReserveOutcome::BusinessRuleViolation {
            reason: format!("resource is {}", resource.status.as_str()),
        };
    }
    let total_capacity = resource.total_capacity;

    let Some(slot) = world.timeslots.get_mut(&timeslot_id) else {
        return ReserveOutcome::SlotNotFound;
    };
    if slot.tenant_id != tenant_id || slot.resource_id != resource_id {
        return ReserveOutcome::SlotNotFound;
    }
    if slot.version != expected_version {
        return ReserveOutcome::VersionMismatch {
            current_version: slot.version,
            current_capacity: slot.available_capacity,
        };
    }

    let new_capacity = match kind {
        MutationKind::Reserve(delta) | MutationKind::Release(delta) if delta < 1 => {
            return ReserveOutcome::BusinessRuleViolation {
                reason: "delta must be at least 1".to_string(),
            };
        }
        MutationKind::Reserve(delta) => slot.available_capacity - delta,
        MutationKind::Release(delta) => slot.available_capacity + delta,
        MutationKind::SetCapacity(value) => value,
    };
    if new_capacity < 0 {
        return ReserveOutcome::CapacityExceeded {
            available: slot.available_capacity,
        };
    }
    if new_capacity > total_capacity {
        return ReserveOutcome::BusinessRuleViolation {
            reason: format!(
                "capacity {new_capacity} would exceed the resource total of {total_capacity}"
            ),
        };
    }

    slot.available_capacity = new_capacity;
    slot.version += 1;
    slot.updated_at = now;
    ReserveOutcome::Ok {
        new_capacity,
        new_version: slot.version,
    }
}

fn push_outbox(world: &mut World, tenant_id: TenantId, event: &NewOutboxEvent, now: DateTime<Utc>) {
    world.outbox.push(OutboxEvent {
        id: OutboxEventId::new(),
        tenant_id,
        event_type: event.event_type.clone(),
        aggregate_type: event.aggregate_type.clone(),
        aggregate_id: event.aggregate_id.clone(),
        payload: event.payload.clone(),
        status: OutboxStatus::Pending,
        attempts: 0,
        last_error: None,
        next_attempt_at: now,
        created_at: now,
        published_at: None,
        trace_id: event.trace_id.clone(),
        correlation_id: event.correlation_id.clone(),
        claimed_by: None,
        claimed_at: None,
    });
}

#[async_trait]
impl InventoryStore for InMemoryStores {
    async fn available_slots(
        &self,
        tenant_id: TenantId,
        resource_ids: &[ResourceId],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        min_capacity: Option<i32>,
    ) -> Result<Vec<AvailableSlot>, StoreError> {
        let world = self.world.lock();
        let mut slots: Vec<AvailableSlot> = world
            .timeslots
            .values()
            .filter(|s| {
                s.tenant_id == tenant_id
                    && resource_ids.contains(&s.resource_id)
                    && s.start_at >= from
                    && s.end_at <= to
                    && min_capacity.is_none_or(|min| s.available_capacity >= min)
            })
            .map(|s| AvailableSlot {
                timeslot: s.clone(),
                total_capacity: world
                    .resources
                    .get(&s.resource_id)
                    .map_or(0, |r| r.total_capacity),
            })
            .collect();
        slots.sort_by_key(|s| (s.timeslot.resource_id, s.timeslot.start_at));
        Ok(slots)
    }

    async fn timeslot(
        &self,
        tenant_id: TenantId,
        timeslot_id: TimeslotId,
    ) -> Result<Option<Timeslot>, StoreError> {
        Ok(self
            .world
            .lock()
            .timeslots
            .get(&timeslot_id)
            .filter(|s| s.tenant_id == tenant_id)
            .cloned())
    }

    async fn batch_availability(
        &self,
        tenant_id: TenantId,
        probes: &[AvailabilityProbe],
    ) -> Result<Vec<AvailabilityReport>, StoreError> {
        let world = self.world.lock();
        Ok(probes
            .iter()
            .map(|probe| {
                let in_range: Vec<&Timeslot> = world
                    .timeslots
                    .values()
                    .filter(|s| {
                        s.tenant_id == tenant_id
                            && s.resource_id == probe.resource_id
                            && s.start_at >= probe.start_at
                            && s.end_at <= probe.end_at
                    })
                    .collect();
                let available = in_range
                    .iter()
                    .map(|s| s.available_capacity)
                    .min()
                    .unwrap_or(0);
                AvailabilityReport {
                    resource_id: probe.resource_id,
                    available,
                    fits: !in_range.is_empty() && available >= probe.required,
                }
            })
            .collect())
    }

    async fn reserve(
        &self,
        tenant_id: TenantId,
        timeslot_id: TimeslotId,
        resource_id: ResourceId,
        delta: i32,
        expected_version: i64,
    ) -> Result<ReserveOutcome, StoreError> {
        let mut world = self.world.lock();
        Ok(mutate_slot(
            &mut world,
            tenant_id,
            timeslot_id,
            resource_id,
            MutationKind::Reserve(delta),
            expected_version,
            Utc::now(),
        ))
    }

    async fn release(
        &self,
        tenant_id: TenantId,
        timeslot_id: TimeslotId,
        resource_id: ResourceId,
        delta: i32,
        expected_version: i64,
    ) -> Result<ReserveOutcome, StoreError> {
        let mut world = self.world.lock();
        Ok(mutate_slot(
            &mut world,
            tenant_id,
            timeslot_id,
            resource_id,
            MutationKind::Release(delta),
            expected_version,
            Utc::now(),
        ))
    }

    async fn set_capacity(
        &self,
        tenant_id: TenantId,
        timeslot_id: TimeslotId,
        resource_id: ResourceId,
        value: i32,
        expected_version: i64,
    ) -> Result<ReserveOutcome, StoreError> {
        let mut world = self.world.lock();
        Ok(mutate_slot(
            &mut world,
            tenant_id,
            timeslot_id,
            resource_id,
            MutationKind::SetCapacity(value),
            expected_version,
            Utc::now(),
        ))
    }

    async fn bulk_mutate(
        &self,
        tenant_id: TenantId,
        mut mutations: Vec<CapacityMutation>,
    ) -> Result<Vec<MutationResult>, StoreError> {
        canonical_lock_order(&mut mutations);
        let mut world = self.world.lock();
        let undo: HashMap<TimeslotId, Timeslot> = mutations
            .iter()
            .filter_map(|m| world.timeslots.get(&m.timeslot_id).cloned())
            .map(|s| (s.id, s))
            .collect();

        let mut results = Vec::with_capacity(mutations.len());
        for mutation in &mutations {
            let outcome = mutate_slot(
                &mut world,
                tenant_id,
                mutation.timeslot_id,
                mutation.resource_id,
                mutation.kind,
                mutation.expected_version,
                Utc::now(),
            );
            let failed = !outcome.is_ok();
            results.push(MutationResult {
                timeslot_id: mutation.timeslot_id,
                outcome,
            });
            if failed {
                for (id, slot) in undo {
                    world.timeslots.insert(id, slot);
                }
                return Ok(results);
            }
        }
        Ok(results)
    }

    async fn create_timeslots(
        &self,
        tenant_id: TenantId,
        resource_id: ResourceId,
        seeds: &[TimeslotSeed],
    ) -> Result<u64, StoreError> {
        let mut world = self.world.lock();
        let mut written = 0u64;
        for seed in seeds {
            let existing = world
                .timeslots
                .values()
                .find(|s| {
                    s.tenant_id == tenant_id
                        && s.resource_id == resource_id
                        && s.start_at == seed.start_at
                        && s.end_at == seed.end_at
                })
                .map(|s| s.id);
            match existing {
                Some(id) => {
                    if let Some(slot) = world.timeslots.get_mut(&id) {
                        slot.available_capacity = seed.capacity;
                        slot.version += 1;
                        slot.updated_at = Utc::now();
                    }
                }
                None => {
                    let slot = Timeslot {
                        id: TimeslotId::new(),
                        tenant_id,
                        resource_id,
                        start_at: seed.start_at,
                        end_at: seed.end_at,
                        available_capacity: seed.capacity,
                        version: 1,
                        updated_at: Utc::now(),
                    };
                    world.timeslots.insert(slot.id, slot);
                }
            }
            written += 1;
        }
        Ok(written)
    }

    async fn cleanup_expired(
        &self,
        tenant_id: TenantId,
        before: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<u64, StoreError> {
        let mut world = self.world.lock();
        let doomed: Vec<TimeslotId> = world
            .timeslots
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.end_at < before)
            .take(batch_size)
            .map(|s| s.id)
            .collect();
        for id in &doomed {
            world.timeslots.remove(id);
        }
        Ok(doomed.len() as u64)
    }
}

#[async_trait]
impl BookingStore for InMemoryStores {
    async fn execute_confirm(&self, cmd: ConfirmCommand) -> Result<ConfirmOutcome, StoreError> {
        let mut world = self.world.lock();
        if let Some(fault) = world.confirm_faults.pop_front() {
            return Err(fault);
        }

        // All-or-nothing: snapshot the touched slots for rollback.
        let undo: HashMap<TimeslotId, Timeslot> = cmd
            .items
            .iter()
            .filter_map(|i| world.timeslots.get(&i.timeslot_id).cloned())
            .map(|s| (s.id, s))
            .collect();

        let now = cmd.booking.created_at;
        let mut new_versions = Vec::with_capacity(cmd.items.len());
        for (index, item) in cmd.items.iter().enumerate() {
            let outcome = mutate_slot(
                &mut world,
                cmd.tenant_id,
                item.timeslot_id,
                item.resource_id,
                MutationKind::Reserve(item.capacity),
                item.expected_version,
                now,
            );
            match outcome {
                ReserveOutcome::Ok { new_version, .. } => {
                    new_versions.push((item.timeslot_id, new_version));
                }
                other => {
                    for (id, slot) in undo {
                        world.timeslots.insert(id, slot);
                    }
                    return Ok(ConfirmOutcome::ItemFailed {
                        index,
                        outcome: other,
                    });
                }
            }
        }

        world.bookings.insert(cmd.booking.id, cmd.booking.clone());
        world.items.insert(
            cmd.booking.id,
            cmd.items
                .iter()
                .map(|i| BookingItem {
                    booking_id: cmd.booking.id,
                    timeslot_id: i.timeslot_id,
                    resource_id: i.resource_id,
                    reserved_capacity: i.capacity,
                })
                .collect(),
        );
        for event in &cmd.events {
            push_outbox(&mut world, cmd.tenant_id, event, now);
        }
        world.changes.push(cmd.change);

        Ok(ConfirmOutcome::Committed {
            booking: cmd.booking,
            new_versions,
        })
    }

    async fn execute_transition(
        &self,
        cmd: TransitionCommand,
    ) -> Result<TransitionOutcome, StoreError> {
        let mut world = self.world.lock();

        let current = world
            .bookings
            .get(&cmd.booking_id)
            .ok_or(StoreError::NotFound)?
            .clone();
        if current.status != cmd.expect_status {
            return Ok(TransitionOutcome::StatusConflict {
                current: current.status,
            });
        }

        let undo: HashMap<TimeslotId, Timeslot> = cmd
            .release_items
            .iter()
            .filter_map(|i| world.timeslots.get(&i.timeslot_id).cloned())
            .map(|s| (s.id, s))
            .collect();
        let now = cmd.change.changed_at;

        for (index, item) in cmd.release_items.iter().enumerate() {
            let outcome = mutate_slot(
                &mut world,
                cmd.tenant_id,
                item.timeslot_id,
                item.resource_id,
                MutationKind::Release(item.capacity),
                item.expected_version,
                now,
            );
            if !outcome.is_ok() {
                for (id, slot) in undo {
                    world.timeslots.insert(id, slot);
                }
                return Ok(TransitionOutcome::ItemFailed { index, outcome });
            }
        }

        let booking = {
            let Some(entry) = world.bookings.get_mut(&cmd.booking_id) else {
                return Err(StoreError::NotFound);
            };
            entry.status = cmd.new_status;
            entry.updated_at = now;
            if cmd.clear_expiry {
                entry.expires_at = None;
            }
            entry.clone()
        };
        for event in &cmd.events {
            push_outbox(&mut world, cmd.tenant_id, event, now);
        }
        world.changes.push(cmd.change);

        Ok(TransitionOutcome::Committed { booking })
    }

    async fn get(
        &self,
        tenant_id: TenantId,
        booking_id: BookingId,
    ) -> Result<Option<Booking>, StoreError> {
        Ok(self
            .world
            .lock()
            .bookings
            .get(&booking_id)
            .filter(|b| b.tenant_id == tenant_id)
            .cloned())
    }

    async fn items(
        &self,
        _tenant_id: TenantId,
        booking_id: BookingId,
    ) -> Result<Vec<BookingItem>, StoreError> {
        Ok(self
            .world
            .lock()
            .items
            .get(&booking_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_by_idempotency_key(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<Booking>, StoreError> {
        Ok(self
            .world
            .lock()
            .bookings
            .values()
            .filter(|b| b.tenant_id == tenant_id && b.idempotency_key == key)
            .max_by_key(|b| b.created_at)
            .cloned())
    }

    async fn overlapping_active(
        &self,
        tenant_id: TenantId,
        customer_id: CustomerId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Booking>, StoreError> {
        Ok(self
            .world
            .lock()
            .bookings
            .values()
            .filter(|b| {
                b.tenant_id == tenant_id
                    && b.customer_id == customer_id
                    && b.status.holds_capacity()
                    && b.start_at < to
                    && b.end_at > from
            })
            .cloned()
            .collect())
    }

    async fn active_count(
        &self,
        tenant_id: TenantId,
        customer_id: CustomerId,
    ) -> Result<i64, StoreError> {
        Ok(self
            .world
            .lock()
            .bookings
            .values()
            .filter(|b| {
                b.tenant_id == tenant_id
                    && b.customer_id == customer_id
                    && b.status.holds_capacity()
            })
            .count() as i64)
    }

    async fn find_expired_tentative(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Booking>, StoreError> {
        let world = self.world.lock();
        let mut expired: Vec<Booking> = world
            .bookings
            .values()
            .filter(|b| {
                b.status == BookingStatus::Tentative
                    && b.expires_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();
        expired.sort_by_key(|b| b.expires_at);
        expired.truncate(limit);
        Ok(expired)
    }

    async fn append_change(&self, change: &BookingChange) -> Result<(), StoreError> {
        self.world.lock().changes.push(change.clone());
        Ok(())
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryStores {
    async fn get(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        Ok(self
            .world
            .lock()
            .idempotency
            .get(&(key.to_string(), tenant_id))
            .cloned())
    }

    async fn insert(&self, record: &IdempotencyRecord) -> Result<bool, StoreError> {
        let mut world = self.world.lock();
        let key = (record.key.clone(), record.tenant_id);
        if let Some(existing) = world.idempotency.get(&key) {
            let expired = existing.status == IdempotencyStatus::Expired
                || existing.expires_at <= record.created_at;
            if !expired {
                return Ok(false);
            }
        }
        world.idempotency.insert(key, record.clone());
        Ok(true)
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
        let mut world = self.world.lock();
        let Some(record) = world.idempotency.get_mut(&(key.to_string(), tenant_id)) else {
            return Ok(false);
        };
        if record.status != from {
            return Ok(false);
        }
        record.status = to;
        if let Some(response) = response {
            record.response_meta = Some(response.clone());
        }
        if to == IdempotencyStatus::Failed {
            record.retry_count += 1;
        }
        record.timings = timings;
        record.updated_at = now;
        Ok(true)
    }

    async fn delete_expired(
        &self,
        now: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<u64, StoreError> {
        let mut world = self.world.lock();
        let doomed: Vec<(String, TenantId)> = world
            .idempotency
            .iter()
            .filter(|(_, r)| r.expires_at <= now)
            .take(batch_size)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            world.idempotency.remove(key);
        }
        Ok(doomed.len() as u64)
    }

    async fn find_stale_processing(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<IdempotencyRecord>, StoreError> {
        let world = self.world.lock();
        let mut stale: Vec<IdempotencyRecord> = world
            .idempotency
            .values()
            .filter(|r| r.status == IdempotencyStatus::Processing && r.updated_at < older_than)
            .cloned()
            .collect();
        stale.sort_by_key(|r| r.updated_at);
        stale.truncate(limit);
        Ok(stale)
    }
}

#[async_trait]
impl OutboxStore for InMemoryStores {
    async fn append(
        &self,
        tenant_id: TenantId,
        event: NewOutboxEvent,
    ) -> Result<OutboxEventId, StoreError> {
        let mut world = self.world.lock();
        push_outbox(&mut world, tenant_id, &event, Utc::now());
        Ok(world.outbox.last().map(|e| e.id).unwrap_or_default())
    }

    async fn claim_batch(
        &self,
        worker: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxEvent>, StoreError> {
        let mut world = self.world.lock();
        let mut due: Vec<usize> = world
            .outbox
            .iter()
            .enumerate()
            .filter(|(_, e)| e.status == OutboxStatus::Pending && e.next_attempt_at <= now)
            .map(|(i, _)| i)
            .collect();
        due.sort_by_key(|&i| world.outbox[i].created_at);
        due.truncate(limit);

        let mut claimed = Vec::with_capacity(due.len());
        for i in due {
            let event = &mut world.outbox[i];
            event.status = OutboxStatus::Publishing;
            event.claimed_by = Some(worker.to_string());
            event.claimed_at = Some(now);
            claimed.push(event.clone());
        }
        Ok(claimed)
    }

    async fn mark_published(
        &self,
        id: OutboxEventId,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut world = self.world.lock();
        if let Some(event) = world.outbox.iter_mut().find(|e| e.id == id) {
            event.status = OutboxStatus::Published;
            event.published_at = Some(now);
            event.claimed_by = None;
            event.claimed_at = None;
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: OutboxEventId,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        deadletter: bool,
    ) -> Result<(), StoreError> {
        let mut world = self.world.lock();
        if let Some(event) = world.outbox.iter_mut().find(|e| e.id == id) {
            event.status = if deadletter {
                OutboxStatus::Deadletter
            } else {
                OutboxStatus::Pending
            };
            event.attempts += 1;
            event.last_error = Some(error.to_string());
            event.next_attempt_at = next_attempt_at;
            event.claimed_by = None;
            event.claimed_at = None;
        }
        Ok(())
    }

    async fn release_stale_claims(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut world = self.world.lock();
        let mut released = 0u64;
        for event in &mut world.outbox {
            if event.status == OutboxStatus::Publishing
                && event.claimed_at.is_some_and(|at| at < older_than)
            {
                event.status = OutboxStatus::Pending;
                event.claimed_by = None;
                event.claimed_at = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn counts(&self) -> Result<OutboxCounts, StoreError> {
        let world = self.world.lock();
        let count = |status: OutboxStatus| {
            world.outbox.iter().filter(|e| e.status == status).count() as i64
        };
        Ok(OutboxCounts {
            pending: count(OutboxStatus::Pending),
            publishing: count(OutboxStatus::Publishing),
            deadletter: count(OutboxStatus::Deadletter),
        })
    }
}

#[async_trait]
impl DispatchStore for InMemoryStores {
    async fn insert_many(&self, dispatches: &[NewDispatch]) -> Result<u64, StoreError> {
        let mut world = self.world.lock();
        let mut inserted = 0u64;
        for dispatch in dispatches {
            // NULL outbox ids never conflict, mirroring the SQL unique index.
            let duplicate = dispatch.outbox_event_id.is_some()
                && world.dispatches.iter().any(|d| {
                    d.outbox_event_id == dispatch.outbox_event_id
                        && d.channel == dispatch.channel
                        && d.recipient_id == dispatch.recipient_id
                });
            if duplicate {
                continue;
            }
            let now = Utc::now();
            world.dispatches.push(NotificationDispatch {
                id: DispatchId::new(),
                outbox_event_id: dispatch.outbox_event_id,
                tenant_id: dispatch.tenant_id,
                channel: dispatch.channel,
                status: DispatchStatus::Pending,
                recipient: dispatch.recipient.clone(),
                recipient_id: dispatch.recipient_id.clone(),
                template_type: dispatch.template_type.clone(),
                variables: dispatch.variables.clone(),
                priority: dispatch.priority,
                attempts: 0,
                next_attempt_at: now,
                external_id: None,
                delivered_at: None,
                expires_at: dispatch.expires_at,
                last_error: None,
                created_at: now,
                updated_at: now,
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn claim_due(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationDispatch>, StoreError> {
        let mut world = self.world.lock();
        let mut due: Vec<usize> = world
            .dispatches
            .iter()
            .enumerate()
            .filter(|(_, d)| {
                d.status == DispatchStatus::Pending
                    && d.next_attempt_at <= now
                    && d.expires_at.is_none_or(|at| at > now)
            })
            .map(|(i, _)| i)
            .collect();
        due.sort_by_key(|&i| {
            let d = &world.dispatches[i];
            (std::cmp::Reverse(d.priority), d.next_attempt_at)
        });
        due.truncate(limit);

        let mut claimed = Vec::with_capacity(due.len());
        for i in due {
            let dispatch = &mut world.dispatches[i];
            dispatch.status = DispatchStatus::Sending;
            dispatch.updated_at = now;
            claimed.push(dispatch.clone());
        }
        Ok(claimed)
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
        let mut world = self.world.lock();
        let Some(dispatch) = world.dispatches.iter_mut().find(|d| d.id == id) else {
            return Ok(false);
        };
        if !dispatch.status.can_transition(status) {
            return Ok(false);
        }
        dispatch.status = status;
        if let Some(external_id) = external_id {
            dispatch.external_id = Some(external_id.to_string());
        }
        if let Some(error) = error {
            dispatch.last_error = Some(error.to_string());
        }
        if let Some(at) = next_attempt_at {
            dispatch.next_attempt_at = at;
        }
        if bump_attempts {
            dispatch.attempts += 1;
        }
        if status == DispatchStatus::Delivered {
            dispatch.delivered_at = Some(now);
        }
        dispatch.updated_at = now;
        Ok(true)
    }

    async fn update_by_external_id(
        &self,
        external_id: &str,
        status: DispatchStatus,
        delivered_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let mut world = self.world.lock();
        let Some(dispatch) = world
            .dispatches
            .iter_mut()
            .find(|d| d.external_id.as_deref() == Some(external_id))
        else {
            return Ok(false);
        };
        if !dispatch.status.can_transition(status) {
            return Ok(false);
        }
        dispatch.status = status;
        if let Some(at) = delivered_at {
            dispatch.delivered_at = Some(at);
        }
        dispatch.updated_at = Utc::now();
        Ok(true)
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut world = self.world.lock();
        let mut expired = 0u64;
        for dispatch in &mut world.dispatches {
            if dispatch.status == DispatchStatus::Pending
                && dispatch.expires_at.is_some_and(|at| at <= now)
            {
                dispatch.status = DispatchStatus::Expired;
                dispatch.updated_at = now;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn get(&self, id: DispatchId) -> Result<Option<NotificationDispatch>, StoreError> {
        Ok(self.world.lock().dispatches.iter().find(|d| d.id == id).cloned())
    }
}

#[async_trait]
impl SagaStore for InMemoryStores {
    async fn insert(&self, execution: &SagaExecution) -> Result<(), StoreError> {
        self.world
            .lock()
            .sagas
            .insert(execution.saga_id, execution.clone());
        Ok(())
    }

    async fn update(&self, execution: &SagaExecution) -> Result<(), StoreError> {
        self.world
            .lock()
            .sagas
            .insert(execution.saga_id, execution.clone());
        Ok(())
    }

    async fn get(&self, saga_id: SagaId) -> Result<Option<SagaExecution>, StoreError> {
        Ok(self.world.lock().sagas.get(&saga_id).cloned())
    }

    async fn upsert_participant(
        &self,
        participant: &TransactionParticipant,
    ) -> Result<(), StoreError> {
        self.world.lock().participants.insert(
            (participant.transaction_id, participant.participant.clone()),
            participant.clone(),
        );
        Ok(())
    }

    async fn find_stuck(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TransactionParticipant>, StoreError> {
        let world = self.world.lock();
        let mut stuck: Vec<TransactionParticipant> = world
            .participants
            .values()
            .filter(|p| p.expires_at <= now && !p.status.is_settled())
            .cloned()
            .collect();
        stuck.sort_by_key(|p| p.expires_at);
        stuck.truncate(limit);
        Ok(stuck)
    }
}

#[async_trait]
impl WebhookDedupStore for InMemoryStores {
    async fn record(
        &self,
        provider: &str,
        provider_event_id: &str,
        _now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(self
            .world
            .lock()
            .webhook_seen
            .insert((provider.to_string(), provider_event_id.to_string())))
    }

    async fn prune(&self, _before: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(0)
    }
}

#[async_trait]
impl CatalogStore for InMemoryStores {
    async fn resource(
        &self,
        tenant_id: TenantId,
        resource_id: ResourceId,
    ) -> Result<Option<Resource>, StoreError> {
        Ok(self
            .world
            .lock()
            .resources
            .get(&resource_id)
            .filter(|r| r.tenant_id == tenant_id)
            .cloned())
    }

    async fn service(
        &self,
        tenant_id: TenantId,
        service_id: ServiceId,
    ) -> Result<Option<Service>, StoreError> {
        Ok(self
            .world
            .lock()
            .services
            .get(&service_id)
            .filter(|s| s.tenant_id == tenant_id)
            .cloned())
    }

    async fn resources_for_service(
        &self,
        _tenant_id: TenantId,
        service_id: ServiceId,
    ) -> Result<Vec<ResourceId>, StoreError> {
        let world = self.world.lock();
        let mut resources: Vec<ResourceId> = world
            .capabilities
            .iter()
            .filter(|(_, s)| *s == service_id)
            .map(|(r, _)| *r)
            .collect();
        resources.sort();
        Ok(resources)
    }

    async fn resource_supports_service(
        &self,
        _tenant_id: TenantId,
        resource_id: ResourceId,
        service_id: ServiceId,
    ) -> Result<bool, StoreError> {
        Ok(self
            .world
            .lock()
            .capabilities
            .contains(&(resource_id, service_id)))
    }

    async fn business_hours(
        &self,
        tenant_id: TenantId,
        resource_id: ResourceId,
    ) -> Result<Vec<BusinessHours>, StoreError> {
        Ok(self
            .world
            .lock()
            .business_hours
            .iter()
            .filter(|h| {
                h.tenant_id == tenant_id
                    && (h.resource_id.is_none() || h.resource_id == Some(resource_id))
            })
            .cloned()
            .collect())
    }

    async fn holidays(
        &self,
        tenant_id: TenantId,
        from: chrono::NaiveDate,
        to: chrono::NaiveDate,
    ) -> Result<Vec<Holiday>, StoreError> {
        Ok(self
            .world
            .lock()
            .holidays
            .iter()
            .filter(|h| h.tenant_id == tenant_id && h.date >= from && h.date <= to)
            .cloned()
            .collect())
    }

    async fn time_off(
        &self,
        tenant_id: TenantId,
        resource_id: ResourceId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ResourceTimeOff>, StoreError> {
        Ok(self
            .world
            .lock()
            .time_off
            .iter()
            .filter(|t| {
                t.tenant_id == tenant_id
                    && t.resource_id == resource_id
                    && t.start_at < to
                    && t.end_at > from
            })
            .cloned()
            .collect())
    }

    async fn customer(
        &self,
        tenant_id: TenantId,
        customer_id: CustomerId,
    ) -> Result<Option<Customer>, StoreError> {
        Ok(self
            .world
            .lock()
            .customers
            .get(&customer_id)
            .filter(|c| c.tenant_id == tenant_id)
            .cloned())
    }

    async fn template(
        &self,
        tenant_id: TenantId,
        template_type: &str,
        language: &str,
    ) -> Result<Option<NotificationTemplate>, StoreError> {
        let world = self.world.lock();
        let exact = world.templates.iter().find(|t| {
            t.tenant_id == tenant_id && t.template_type == template_type && t.language == language
        });
        let fallback = world.templates.iter().find(|t| {
            t.tenant_id == tenant_id && t.template_type == template_type && t.language == "default"
        });
        Ok(exact.or(fallback).cloned())
    }

    async fn preferences(
        &self,
        tenant_id: TenantId,
        customer_id: CustomerId,
    ) -> Result<NotificationPreferences, StoreError> {
        Ok(self
            .world
            .lock()
            .preferences
            .get(&(tenant_id, customer_id))
            .cloned()
            .unwrap_or_else(|| NotificationPreferences::allow_all(tenant_id, customer_id)))
    }
}

/// In-memory advisory cache tier with TTLs.
#[derive(Default)]
pub struct InMemoryIdempotencyCache {
    entries: Mutex<HashMap<(String, TenantId), (IdempotencyRecord, Instant)>>,
}

impl InMemoryIdempotencyCache {
    /// Fresh, empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyCache for InMemoryIdempotencyCache {
    async fn get(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        let entries = self.entries.lock();
        Ok(entries
            .get(&(key.to_string(), tenant_id))
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(record, _)| record.clone()))
    }

    async fn put(
        &self,
        record: &IdempotencyRecord,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.entries.lock().insert(
            (record.key.clone(), record.tenant_id),
            (record.clone(), Instant::now() + ttl),
        );
        Ok(())
    }

    async fn remove(&self, tenant_id: TenantId, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(&(key.to_string(), tenant_id));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)] // Test code can use unwrap
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reservo_core::domain::catalog::ResourceStatus;
    use reservo_core::domain::inventory::ResourceKind;
    use reservo_core::stores::booking::ReservationItem;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, h, m, 0).unwrap()
    }

    fn seed(stores: &InMemoryStores, capacity: i32) -> (TenantId, ResourceId, Timeslot) {
        let tenant = TenantId::new();
        let resource_id = ResourceId::new();
        stores.add_resource(Resource {
            id: resource_id,
            tenant_id: tenant,
            kind: ResourceKind::Room,
            total_capacity: capacity,
            status: ResourceStatus::Active,
        });
        let slot = stores.add_timeslot(tenant, resource_id, ts(10, 0), ts(11, 0), capacity);
        (tenant, resource_id, slot)
    }

    fn confirm_cmd(
        tenant: TenantId,
        resource: ResourceId,
        slot: &Timeslot,
        capacity: i32,
        version: i64,
    ) -> ConfirmCommand {
        let booking = Booking {
            id: BookingId::new(),
            tenant_id: tenant,
            customer_id: CustomerId::new(),
            service_id: ServiceId::new(),
            start_at: slot.start_at,
            end_at: slot.end_at,
            status: BookingStatus::Confirmed,
            total_minor: 10_000,
            idempotency_key: "k-1".into(),
            expires_at: None,
            created_at: ts(8, 0),
            updated_at: ts(8, 0),
        };
        ConfirmCommand {
            tenant_id: tenant,
            items: vec![ReservationItem {
                timeslot_id: slot.id,
                resource_id: resource,
                capacity,
                expected_version: version,
            }],
            events: vec![NewOutboxEvent::for_booking(
                reservo_core::domain::outbox::event_types::BOOKING_CREATED,
                booking.id,
                serde_json::json!({}),
                None,
            )],
            change: BookingChange {
                booking_id: booking.id,
                old_status: None,
                new_status: BookingStatus::Confirmed,
                old_start_at: None,
                new_start_at: booking.start_at,
                reason: None,
                actor: "test".into(),
                changed_at: ts(8, 0),
            },
            booking,
        }
    }

    #[tokio::test]
    async fn confirm_decrements_capacity_and_appends_outbox() {
        let stores = InMemoryStores::new();
        let (tenant, resource, slot) = seed(&stores, 2);
        let outcome = stores
            .execute_confirm(confirm_cmd(tenant, resource, &slot, 1, 1))
            .await
            .unwrap();
        assert!(matches!(outcome, ConfirmOutcome::Committed { .. }));
        assert_eq!(stores.timeslot(slot.id).unwrap().available_capacity, 1);
        assert_eq!(stores.timeslot(slot.id).unwrap().version, 2);
        assert_eq!(stores.outbox_events().len(), 1);
    }

    #[tokio::test]
    async fn failed_confirm_rolls_back_everything() {
        let stores = InMemoryStores::new();
        let (tenant, resource, slot) = seed(&stores, 1);
        // First confirm takes the only unit.
        stores
            .execute_confirm(confirm_cmd(tenant, resource, &slot, 1, 1))
            .await
            .unwrap();
        // Second confirm fails on capacity and must leave no trace.
        let outcome = stores
            .execute_confirm(confirm_cmd(tenant, resource, &slot, 1, 2))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            ConfirmOutcome::ItemFailed {
                outcome: ReserveOutcome::CapacityExceeded { .. },
                ..
            }
        ));
        assert_eq!(stores.all_bookings().len(), 1);
        assert_eq!(stores.outbox_events().len(), 1);
        assert_eq!(stores.timeslot(slot.id).unwrap().available_capacity, 0);
    }

    #[tokio::test]
    async fn version_mismatch_reports_current_state() {
        let stores = InMemoryStores::new();
        let (tenant, resource, slot) = seed(&stores, 2);
        let outcome = stores
            .execute_confirm(confirm_cmd(tenant, resource, &slot, 1, 99))
            .await
            .unwrap();
        match outcome {
            ConfirmOutcome::ItemFailed {
                outcome:
                    ReserveOutcome::VersionMismatch {
                        current_version,
                        current_capacity,
                    },
                ..
            } => {
                assert_eq!(current_version, 1);
                assert_eq!(current_capacity, 2);
            }
            other => panic!("expected version mismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn injected_fault_is_returned_once() {
        let stores = InMemoryStores::new();
        let (tenant, resource, slot) = seed(&stores, 2);
        stores.inject_confirm_fault(StoreError::SerializationConflict("40P01".into()));
        let err = stores
            .execute_confirm(confirm_cmd(tenant, resource, &slot, 1, 1))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        // Next attempt succeeds.
        let outcome = stores
            .execute_confirm(confirm_cmd(tenant, resource, &slot, 1, 1))
            .await
            .unwrap();
        assert!(matches!(outcome, ConfirmOutcome::Committed { .. }));
    }

    #[tokio::test]
    async fn outbox_claims_are_exclusive_and_ordered() {
        let stores = InMemoryStores::new();
        let tenant = TenantId::new();
        for i in 0..3 {
            stores
                .append(
                    tenant,
                    NewOutboxEvent {
                        event_type: format!("E{i}"),
                        aggregate_type: "booking".into(),
                        aggregate_id: "a".into(),
                        payload: serde_json::json!({}),
                        trace_id: None,
                        correlation_id: None,
                    },
                )
                .await
                .unwrap();
        }
        let now = Utc::now() + chrono::Duration::seconds(1);
        let first = stores.claim_batch("w1", 2, now).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].event_type, "E0");
        let second = stores.claim_batch("w2", 10, now).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].event_type, "E2");
    }

    #[tokio::test]
    async fn dispatch_dedup_key_suppresses_duplicates() {
        let stores = InMemoryStores::new();
        let tenant = TenantId::new();
        let event_id = OutboxEventId::new();
        let dispatch = NewDispatch {
            outbox_event_id: Some(event_id),
            tenant_id: tenant,
            channel: reservo_core::domain::notification::Channel::Email,
            recipient: "c@example.com".into(),
            recipient_id: "cust-1".into(),
            template_type: "booking_created".into(),
            variables: serde_json::json!({}),
            priority: reservo_core::domain::notification::Priority::Normal,
            expires_at: None,
        };
        assert_eq!(stores.insert_many(&[dispatch.clone()]).await.unwrap(), 1);
        assert_eq!(stores.insert_many(&[dispatch]).await.unwrap(), 0);
        assert_eq!(stores.dispatch_rows().len(), 1);
    }

    #[tokio::test]
    async fn webhook_dedup_reports_replays() {
        let stores = InMemoryStores::new();
        assert!(stores.record("psp", "evt-1", Utc::now()).await.unwrap());
        assert!(!stores.record("psp", "evt-1", Utc::now()).await.unwrap());
        assert!(stores.record("psp", "evt-2", Utc::now()).await.unwrap());
    }
}
