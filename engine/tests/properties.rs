//! Property tests for the quantified invariants.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use reservo_core::domain::booking::{Booking, BookingChange, BookingStatus};
use reservo_core::domain::catalog::{Resource, ResourceStatus};
use reservo_core::domain::inventory::ResourceKind;
use reservo_core::ids::{BookingId, CustomerId, ResourceId, ServiceId, TenantId};
use reservo_core::stores::booking::{
    BookingStore, ConfirmCommand, ConfirmOutcome, ReservationItem, TransitionCommand,
    TransitionOutcome,
};
use reservo_core::stores::InventoryStore;
use reservo_testing::InMemoryStores;

fn at(h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, h, 0, 0).unwrap()
}

fn seeded(total: i32) -> (InMemoryStores, TenantId, ResourceId, reservo_core::domain::inventory::Timeslot) {
    let stores = InMemoryStores::new();
    let tenant = TenantId::new();
    let resource = ResourceId::new();
    stores.add_resource(Resource {
        id: resource,
        tenant_id: tenant,
        kind: ResourceKind::Seat,
        total_capacity: total,
        status: ResourceStatus::Active,
    });
    let slot = stores.add_timeslot(tenant, resource, at(10), at(11), total);
    (stores, tenant, resource, slot)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Invariant: for every committed state,
    /// `0 <= available_capacity <= total_capacity`: no sequence of
    /// reserve/release/set mutations, with fresh or stale version fences,
    /// can escape the bounds.
    #[test]
    fn capacity_stays_within_bounds(
        total in 1i32..5,
        ops in prop::collection::vec((0u8..3u8, 1i32..4i32, any::<bool>()), 1..40),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let (stores, tenant, resource, slot) = seeded(total);
            for (kind, delta, stale) in ops {
                let current = stores.timeslot(slot.id).unwrap();
                let version = if stale { current.version - 1 } else { current.version };
                let _ = match kind {
                    0 => stores.reserve(tenant, slot.id, resource, delta, version).await,
                    1 => stores.release(tenant, slot.id, resource, delta, version).await,
                    _ => stores.set_capacity(tenant, slot.id, resource, delta, version).await,
                };
                let after = stores.timeslot(slot.id).unwrap();
                prop_assert!(after.available_capacity >= 0);
                prop_assert!(after.available_capacity <= total);
                prop_assert!(after.version >= current.version);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Invariant: capacity is conserved. At every committed state,
    /// `available + sum(active reserved) == total`, across any interleaving
    /// of confirms and cancellations.
    #[test]
    fn capacity_is_conserved_across_confirm_cancel(
        total in 1i32..5,
        ops in prop::collection::vec((any::<bool>(), 1i32..3i32), 1..30),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let (stores, tenant, resource, slot) = seeded(total);
            let mut active: Vec<(BookingId, i32)> = Vec::new();

            for (confirm, capacity) in ops {
                if confirm {
                    let version = stores.timeslot(slot.id).unwrap().version;
                    let booking_id = BookingId::new();
                    let booking = Booking {
                        id: booking_id,
                        tenant_id: tenant,
                        customer_id: CustomerId::new(),
                        service_id: ServiceId::new(),
                        start_at: slot.start_at,
                        end_at: slot.end_at,
                        status: BookingStatus::Confirmed,
                        total_minor: 0,
                        idempotency_key: booking_id.to_string(),
                        expires_at: None,
                        created_at: at(8),
                        updated_at: at(8),
                    };
                    let outcome = stores
                        .execute_confirm(ConfirmCommand {
                            tenant_id: tenant,
                            items: vec![ReservationItem {
                                timeslot_id: slot.id,
                                resource_id: resource,
                                capacity,
                                expected_version: version,
                            }],
                            events: Vec::new(),
                            change: BookingChange {
                                booking_id,
                                old_status: None,
                                new_status: BookingStatus::Confirmed,
                                old_start_at: None,
                                new_start_at: slot.start_at,
                                reason: None,
                                actor: "prop".into(),
                                changed_at: at(8),
                            },
                            booking,
                        })
                        .await
                        .unwrap();
                    if matches!(outcome, ConfirmOutcome::Committed { .. }) {
                        active.push((booking_id, capacity));
                    }
                } else if let Some((booking_id, capacity)) = active.pop() {
                    let version = stores.timeslot(slot.id).unwrap().version;
                    let outcome = stores
                        .execute_transition(TransitionCommand {
                            tenant_id: tenant,
                            booking_id,
                            expect_status: BookingStatus::Confirmed,
                            new_status: BookingStatus::Cancelled,
                            release_items: vec![ReservationItem {
                                timeslot_id: slot.id,
                                resource_id: resource,
                                capacity,
                                expected_version: version,
                            }],
                            events: Vec::new(),
                            change: BookingChange {
                                booking_id,
                                old_status: Some(BookingStatus::Confirmed),
                                new_status: BookingStatus::Cancelled,
                                old_start_at: Some(slot.start_at),
                                new_start_at: slot.start_at,
                                reason: None,
                                actor: "prop".into(),
                                changed_at: at(9),
                            },
                            clear_expiry: false,
                        })
                        .await
                        .unwrap();
                    let committed = matches!(outcome, TransitionOutcome::Committed { .. });
                    prop_assert!(committed);
                }

                let reserved: i32 = active.iter().map(|(_, c)| c).sum();
                let available = stores.timeslot(slot.id).unwrap().available_capacity;
                prop_assert_eq!(available + reserved, total);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}

/// Invariant: at most one record per `(key, tenant)` is ever in flight.
#[tokio::test]
async fn only_one_claim_per_key_is_in_flight() {
    use reservo_core::config::IdempotencyConfig;
    use reservo_core::domain::idempotency::RequestMeta;
    use reservo_engine::IdempotencyService;
    use std::sync::Arc;

    let stores = InMemoryStores::new();
    let tenant = TenantId::new();
    let clock: reservo_core::clock::SharedClock = Arc::new(reservo_testing::TestClock::fixed());
    let service = Arc::new(IdempotencyService::new(
        Arc::new(stores),
        None,
        clock,
        IdempotencyConfig::default(),
    ));
    let meta = RequestMeta {
        method: "POST".into(),
        url: "/v1/bookings".into(),
        content_type: "application/json".into(),
        tenant_id: tenant,
        user: None,
        body: serde_json::json!({"n": 1}),
    };

    let mut claims = 0;
    for _ in 0..8 {
        if service.start_processing(tenant, "key", &meta).await.unwrap() {
            claims += 1;
        }
    }
    assert_eq!(claims, 1, "only the first claim may win while in flight");
}
