//! End-to-end booking scenarios against the in-memory stores.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc, Weekday};
use reservo_core::clock::SharedClock;
use reservo_core::config::{EngineConfig, TentativeConfig};
use reservo_core::domain::booking::{
    BookingRequest, BookingRequestItem, BookingStatus, CancellationReason,
};
use reservo_core::domain::catalog::{BusinessHours, Customer, Resource, ResourceStatus, Service};
use reservo_core::domain::idempotency::RequestMeta;
use reservo_core::domain::inventory::{ResourceKind, Timeslot};
use reservo_core::domain::outbox::event_types;
use reservo_core::error::{CoreError, StoreError};
use reservo_core::ids::{CustomerId, ResourceId, ServiceId, TenantId};
use reservo_core::stores::InventoryStore;
use reservo_engine::{BookingCoordinator, CancelRequest, IdempotencyService, Maintenance};
use reservo_policy::PolicyService;
use reservo_testing::{InMemoryIdempotencyCache, InMemoryStores, TestClock};
use std::sync::Arc;

fn at(h: u32, m: u32) -> DateTime<Utc> {
    // 2025-03-10 is a Monday.
    Utc.with_ymd_and_hms(2025, 3, 10, h, m, 0).unwrap()
}

struct Harness {
    stores: InMemoryStores,
    clock: TestClock,
    coordinator: Arc<BookingCoordinator>,
    maintenance: Arc<Maintenance>,
    tenant: TenantId,
    resource: ResourceId,
    service: ServiceId,
    customer: CustomerId,
    slot: Timeslot,
    next_slot: Timeslot,
}

fn harness_with(config: EngineConfig, capacity: i32, available: i32) -> Harness {
    let stores = InMemoryStores::new();
    let clock = TestClock::at(at(8, 0));
    let shared_clock: SharedClock = Arc::new(clock.clone());

    let tenant = TenantId::new();
    let resource = ResourceId::new();
    let service = ServiceId::new();
    let customer = CustomerId::new();

    stores.add_resource(Resource {
        id: resource,
        tenant_id: tenant,
        kind: ResourceKind::Room,
        total_capacity: capacity,
        status: ResourceStatus::Active,
    });
    stores.add_service(Service {
        id: service,
        tenant_id: tenant,
        duration_minutes: 60,
        price_minor: 10_000,
        buffer_before_minutes: 0,
        buffer_after_minutes: 0,
        min_advance_minutes: 30,
        max_advance_days: 90,
        allow_weekends: true,
        allow_holidays: false,
        requires_approval: false,
        active: true,
    });
    stores.add_capability(resource, service);
    stores.add_customer(Customer {
        id: customer,
        tenant_id: tenant,
        active: true,
        blacklisted: false,
        max_concurrent: 5,
        language: None,
        email: Some("c1@example.com".into()),
        phone: None,
    });
    for day in [Weekday::Mon, Weekday::Tue] {
        stores.add_business_hours(BusinessHours {
            tenant_id: tenant,
            resource_id: None,
            day_of_week: day,
            open_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            close_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            effective_from: None,
            effective_to: None,
        });
    }
    let slot = stores.add_timeslot(tenant, resource, at(10, 0), at(11, 0), available);
    let next_slot = stores.add_timeslot(tenant, resource, at(11, 0), at(12, 0), capacity);

    let store_arc = Arc::new(stores.clone());
    let policy = Arc::new(PolicyService::new(
        store_arc.clone(),
        store_arc.clone(),
        store_arc.clone(),
        shared_clock.clone(),
        config.booking.clone(),
        0,
    ));
    let idempotency = Arc::new(IdempotencyService::new(
        store_arc.clone(),
        Some(Arc::new(InMemoryIdempotencyCache::new())),
        shared_clock.clone(),
        config.idempotency.clone(),
    ));
    let coordinator = Arc::new(BookingCoordinator::new(
        policy,
        idempotency.clone(),
        store_arc.clone(),
        store_arc.clone(),
        None,
        shared_clock.clone(),
        config.clone(),
    ));
    let maintenance = Arc::new(Maintenance::new(
        store_arc.clone(),
        store_arc.clone(),
        idempotency,
        store_arc,
        shared_clock,
        config,
    ));

    Harness {
        stores,
        clock,
        coordinator,
        maintenance,
        tenant,
        resource,
        service,
        customer,
        slot,
        next_slot,
    }
}

fn harness() -> Harness {
    harness_with(EngineConfig::default(), 2, 2)
}

impl Harness {
    fn request(&self, key: &str, capacity: i32) -> BookingRequest {
        self.request_versioned(key, capacity, 1)
    }

    fn request_versioned(&self, key: &str, capacity: i32, version: i64) -> BookingRequest {
        BookingRequest {
            tenant_id: self.tenant,
            customer_id: self.customer,
            service_id: self.service,
            start_at: self.slot.start_at,
            end_at: self.slot.end_at,
            items: vec![BookingRequestItem {
                timeslot_id: self.slot.id,
                resource_id: self.resource,
                start_at: self.slot.start_at,
                end_at: self.slot.end_at,
                capacity,
                expected_version: version,
            }],
            total_minor: 10_000,
            idempotency_key: key.to_string(),
            require_all_slots: true,
        }
    }

    fn meta(&self, request: &BookingRequest) -> RequestMeta {
        RequestMeta {
            method: "POST".into(),
            url: "/v1/bookings".into(),
            content_type: "application/json".into(),
            tenant_id: self.tenant,
            user: Some("admin".into()),
            body: serde_json::to_value(request).unwrap(),
        }
    }
}

// ───────────────────────── Scenario A: happy path ─────────────────────────

#[tokio::test]
async fn confirm_happy_path_decrements_capacity_and_emits_one_event() {
    let h = harness();
    let request = h.request("k-1", 1);
    let meta = h.meta(&request);

    let response = h.coordinator.confirm(request, meta).await.unwrap();
    assert_eq!(response.status, BookingStatus::Confirmed);

    assert_eq!(h.stores.timeslot(h.slot.id).unwrap().available_capacity, 1);
    let events = h.stores.outbox_events();
    let created: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == event_types::BOOKING_CREATED)
        .collect();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].aggregate_id, response.booking_id.to_string());
}

// ─────────────── Scenario B/F: exhaustion under contention ────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_confirms_on_one_unit_yield_exactly_one_booking() {
    let h = harness_with(EngineConfig::default(), 2, 1);

    let ra = h.request("k-a", 1);
    let ma = h.meta(&ra);
    let rb = h.request("k-b", 1);
    let mb = h.meta(&rb);

    let ca = Arc::clone(&h.coordinator);
    let cb = Arc::clone(&h.coordinator);
    let (a, b) = tokio::join!(
        tokio::spawn(async move { ca.confirm(ra, ma).await }),
        tokio::spawn(async move { cb.confirm(rb, mb).await }),
    );
    let results = [a.unwrap(), b.unwrap()];

    let ok_count = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok_count, 1, "exactly one confirm wins the last unit");
    assert_eq!(h.stores.all_bookings().len(), 1);
    assert_eq!(h.stores.timeslot(h.slot.id).unwrap().available_capacity, 0);
    // No capacity leak, no stuck row: the slot version moved exactly once.
    assert_eq!(h.stores.timeslot(h.slot.id).unwrap().version, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn capacity_race_lost_after_validation_reports_alternatives() {
    let h = harness_with(EngineConfig::default(), 2, 1);

    // One injected deadlock delays the confirm into its backoff window.
    h.stores
        .inject_confirm_fault(StoreError::SerializationConflict("40P01: deadlock detected".into()));

    let request = h.request("k-a", 1);
    let meta = h.meta(&request);
    let coordinator = Arc::clone(&h.coordinator);
    let confirm = tokio::spawn(async move { coordinator.confirm(request, meta).await });

    // While it backs off, a competing writer takes the last unit.
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    let outcome = h
        .stores
        .reserve(h.tenant, h.slot.id, h.resource, 1, 1)
        .await
        .unwrap();
    assert!(outcome.is_ok());

    let result = confirm.await.unwrap();
    match result {
        Err(CoreError::CapacityExceeded { suggestions, .. }) => {
            assert!(!suggestions.is_empty(), "suggestions expected");
            assert_eq!(suggestions[0].start_at, at(11, 0));
            assert_eq!(suggestions[0].resource_id, h.resource);
        }
        other => panic!("expected capacity exceeded with alternatives, got {other:?}"),
    }
    // Never a mismatched capacity: the unit went to the competing writer.
    assert_eq!(h.stores.timeslot(h.slot.id).unwrap().available_capacity, 0);
    assert!(h.stores.all_bookings().is_empty());
}

#[tokio::test]
async fn injected_deadlock_is_retried_to_success() {
    let h = harness();
    h.stores
        .inject_confirm_fault(StoreError::SerializationConflict("40001".into()));

    let request = h.request("k-f", 1);
    let meta = h.meta(&request);
    let response = h.coordinator.confirm(request, meta).await.unwrap();

    assert_eq!(response.status, BookingStatus::Confirmed);
    assert_eq!(h.stores.timeslot(h.slot.id).unwrap().available_capacity, 1);
    assert_eq!(h.stores.all_bookings().len(), 1);
}

// ──────────────────── Scenario C: idempotent replay ───────────────────────

#[tokio::test]
async fn identical_replay_returns_cached_response_without_new_rows() {
    let h = harness();
    let request = h.request("k-1", 1);
    let meta = h.meta(&request);

    let first = h.coordinator.confirm(request.clone(), meta.clone()).await.unwrap();
    let second = h.coordinator.confirm(request, meta).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.stores.all_bookings().len(), 1);
    assert_eq!(h.stores.outbox_events().len(), 1);
    assert_eq!(h.stores.timeslot(h.slot.id).unwrap().available_capacity, 1);
}

// ─────────────────── Scenario D: fingerprint mismatch ─────────────────────

#[tokio::test]
async fn same_key_different_body_is_rejected_and_original_untouched() {
    let h = harness();
    let request = h.request("k-1", 1);
    let meta = h.meta(&request);
    h.coordinator.confirm(request, meta).await.unwrap();

    let divergent = h.request_versioned("k-1", 2, 2);
    let meta = h.meta(&divergent);
    let err = h.coordinator.confirm(divergent, meta).await.unwrap_err();
    assert!(matches!(err, CoreError::IdempotencyFingerprintConflict));

    assert_eq!(h.stores.all_bookings().len(), 1);
    assert_eq!(h.stores.timeslot(h.slot.id).unwrap().available_capacity, 1);
}

// ──────────────── Scenario E: cancellation within window ──────────────────

#[tokio::test]
async fn cancellation_within_window_computes_refund_and_restores_capacity() {
    let h = harness();
    let request = h.request("k-1", 1);
    let meta = h.meta(&request);
    let confirmed = h.coordinator.confirm(request, meta).await.unwrap();
    assert_eq!(h.stores.timeslot(h.slot.id).unwrap().available_capacity, 1);

    // 48 h before start (booking starts 10:00 on the 10th; clock is 8:00).
    let response = h
        .coordinator
        .cancel(CancelRequest {
            tenant_id: h.tenant,
            booking_id: confirmed.booking_id,
            reason: CancellationReason::CustomerRequest,
            actor: "customer".into(),
        })
        .await
        .unwrap();

    assert_eq!(response.status, BookingStatus::Cancelled);
    assert_eq!(response.penalty_minor, 1_000);
    assert_eq!(response.refund_minor, 9_000);
    assert_eq!(h.stores.timeslot(h.slot.id).unwrap().available_capacity, 2);

    let events = h.stores.outbox_events();
    assert!(events.iter().any(|e| e.event_type == event_types::BOOKING_CANCELLED));
    assert!(events.iter().any(|e| e.event_type == event_types::PAYMENT_REFUND_REQUESTED));
}

#[tokio::test]
async fn late_cancellation_is_denied_unless_emergency() {
    let h = harness();
    let request = h.request("k-1", 1);
    let meta = h.meta(&request);
    let confirmed = h.coordinator.confirm(request, meta).await.unwrap();

    // Move to one hour before start: inside the 24 h window.
    h.clock.set(at(9, 0));
    let err = h
        .coordinator
        .cancel(CancelRequest {
            tenant_id: h.tenant,
            booking_id: confirmed.booking_id,
            reason: CancellationReason::CustomerRequest,
            actor: "customer".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation { .. }));

    // Emergency bypasses the window and refunds in full.
    let response = h
        .coordinator
        .cancel(CancelRequest {
            tenant_id: h.tenant,
            booking_id: confirmed.booking_id,
            reason: CancellationReason::Emergency,
            actor: "customer".into(),
        })
        .await
        .unwrap();
    assert_eq!(response.penalty_minor, 0);
    assert_eq!(response.refund_minor, 10_000);
    assert_eq!(h.stores.timeslot(h.slot.id).unwrap().available_capacity, 2);
}

// ───────────────────────── Tentative lifecycle ────────────────────────────

#[tokio::test]
async fn tentative_booking_holds_capacity_until_payment_or_expiry() {
    let config = EngineConfig::default().with_tentative(TentativeConfig {
        enabled: true,
        timeout_minutes: 15,
        auto_confirm_on_payment: true,
        max_per_customer: 3,
    });
    let h = harness_with(config, 2, 2);

    let request = h.request("k-t", 1);
    let meta = h.meta(&request);
    let response = h.coordinator.confirm(request, meta).await.unwrap();
    assert_eq!(response.status, BookingStatus::Tentative);
    assert_eq!(response.expires_at, Some(at(8, 15)));
    assert_eq!(h.stores.timeslot(h.slot.id).unwrap().available_capacity, 1);

    // Payment arrives: tentative becomes confirmed, expiry cleared.
    let booking = h
        .coordinator
        .confirm_payment(h.tenant, response.booking_id)
        .await
        .unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert!(booking.expires_at.is_none());
    assert!(h
        .stores
        .outbox_events()
        .iter()
        .any(|e| e.event_type == event_types::BOOKING_CONFIRMED));
}

#[tokio::test]
async fn expired_tentative_reopens_capacity_synchronously() {
    let config = EngineConfig::default().with_tentative(TentativeConfig {
        enabled: true,
        timeout_minutes: 15,
        auto_confirm_on_payment: true,
        max_per_customer: 3,
    });
    let h = harness_with(config, 2, 2);

    let request = h.request("k-t", 1);
    let meta = h.meta(&request);
    let response = h.coordinator.confirm(request, meta).await.unwrap();
    assert_eq!(h.stores.timeslot(h.slot.id).unwrap().available_capacity, 1);

    h.clock.advance(Duration::minutes(20));
    let expired = h.maintenance.expire_tentative().await.unwrap();
    assert_eq!(expired, 1);

    assert_eq!(h.stores.timeslot(h.slot.id).unwrap().available_capacity, 2);
    let booking = h
        .stores
        .all_bookings()
        .into_iter()
        .find(|b| b.id == response.booking_id)
        .unwrap();
    assert_eq!(booking.status, BookingStatus::Cancelled);

    // A late payment webhook finds the booking no longer tentative.
    let err = h
        .coordinator
        .confirm_payment(h.tenant, response.booking_id)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation { .. }));
}

// ───────────────── Reconciliation of stale processing ─────────────────────

#[tokio::test]
async fn stale_processing_record_with_committed_booking_completes() {
    use reservo_core::domain::booking::{Booking, BookingChange};
    use reservo_core::ids::BookingId;
    use reservo_core::stores::booking::{BookingStore, ConfirmCommand, ReservationItem};

    let h = harness();
    let idempotency = IdempotencyService::new(
        Arc::new(h.stores.clone()),
        None,
        Arc::new(h.clock.clone()),
        EngineConfig::default().idempotency,
    );

    // Claim the key, then commit the booking directly, simulating a crash
    // between the transaction commit and the idempotency completion.
    let request = h.request("k-10", 1);
    let meta = h.meta(&request);
    assert!(idempotency.start_processing(h.tenant, "k-10", &meta).await.unwrap());

    let booking_id = BookingId::new();
    let booking = Booking {
        id: booking_id,
        tenant_id: h.tenant,
        customer_id: h.customer,
        service_id: h.service,
        start_at: h.slot.start_at,
        end_at: h.slot.end_at,
        status: BookingStatus::Confirmed,
        total_minor: 10_000,
        idempotency_key: "k-10".into(),
        expires_at: None,
        created_at: at(8, 0),
        updated_at: at(8, 0),
    };
    h.stores
        .execute_confirm(ConfirmCommand {
            tenant_id: h.tenant,
            items: vec![ReservationItem {
                timeslot_id: h.slot.id,
                resource_id: h.resource,
                capacity: 1,
                expected_version: 1,
            }],
            events: Vec::new(),
            change: BookingChange {
                booking_id,
                old_status: None,
                new_status: BookingStatus::Confirmed,
                old_start_at: None,
                new_start_at: h.slot.start_at,
                reason: None,
                actor: "test".into(),
                changed_at: at(8, 0),
            },
            booking,
        })
        .await
        .unwrap();

    h.clock.advance(Duration::minutes(30));
    assert_eq!(h.maintenance.reconcile_stale_processing().await.unwrap(), 1);

    let record = h.stores.idempotency_record(h.tenant, "k-10").unwrap();
    assert_eq!(
        record.status,
        reservo_core::domain::idempotency::IdempotencyStatus::Completed
    );
    let body = record.response_meta.unwrap().body;
    assert_eq!(body["bookingId"], serde_json::json!(booking_id));
}

#[tokio::test]
async fn stale_processing_record_without_booking_fails_for_retry() {
    let h = harness();
    let idempotency = IdempotencyService::new(
        Arc::new(h.stores.clone()),
        None,
        Arc::new(h.clock.clone()),
        EngineConfig::default().idempotency,
    );
    let request = h.request("k-11", 1);
    let meta = h.meta(&request);
    assert!(idempotency.start_processing(h.tenant, "k-11", &meta).await.unwrap());

    h.clock.advance(Duration::minutes(30));
    assert_eq!(h.maintenance.reconcile_stale_processing().await.unwrap(), 1);

    let record = h.stores.idempotency_record(h.tenant, "k-11").unwrap();
    assert_eq!(
        record.status,
        reservo_core::domain::idempotency::IdempotencyStatus::Failed
    );
}

// ───────────────────────── Validation failures ────────────────────────────

#[tokio::test]
async fn validation_failure_records_failed_attempt_and_allows_retry() {
    let h = harness();
    // Capacity 3 exceeds the resource total of 2: validation fails.
    let request = h.request("k-v", 3);
    let meta = h.meta(&request);
    let err = h.coordinator.confirm(request, meta).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation { .. }));
    assert!(h.stores.all_bookings().is_empty());

    // A corrected request under the same key proceeds.
    let request = h.request("k-v", 1);
    let meta = h.meta(&request);
    let response = h.coordinator.confirm(request, meta).await.unwrap();
    assert_eq!(response.status, BookingStatus::Confirmed);
}

// ─────────────────────── Round-trip availability ──────────────────────────

#[tokio::test]
async fn create_then_cancel_restores_availability_exactly() {
    let h = harness();
    let before = h.stores.timeslot(h.slot.id).unwrap().available_capacity;

    let request = h.request("k-rt", 1);
    let meta = h.meta(&request);
    let confirmed = h.coordinator.confirm(request, meta).await.unwrap();
    h.coordinator
        .cancel(CancelRequest {
            tenant_id: h.tenant,
            booking_id: confirmed.booking_id,
            reason: CancellationReason::CustomerRequest,
            actor: "customer".into(),
        })
        .await
        .unwrap();

    assert_eq!(
        h.stores.timeslot(h.slot.id).unwrap().available_capacity,
        before
    );
    // Unused second slot untouched throughout.
    assert_eq!(
        h.stores.timeslot(h.next_slot.id).unwrap().available_capacity,
        2
    );
}
