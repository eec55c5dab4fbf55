//! Relay → dispatcher → webhook pipeline against the in-memory stores.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code

use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reservo_core::clock::{Clock, SharedClock};
use reservo_core::config::{EngineConfig, NotificationConfig};
use reservo_core::domain::catalog::{Customer, Resource, ResourceStatus};
use reservo_core::domain::inventory::ResourceKind;
use reservo_core::domain::notification::{
    Channel, DispatchStatus, NotificationPreferences, ProviderResponse,
};
use reservo_core::domain::outbox::{event_types, NewOutboxEvent, OutboxStatus};
use reservo_core::ids::{CustomerId, ResourceId, TenantId};
use reservo_core::stores::OutboxStore;
use reservo_dispatch::provider::mock::ScriptedProvider;
use reservo_dispatch::provider::NotificationProvider;
use reservo_dispatch::{Dispatcher, OutboxRelay, WebhookIngress};
use reservo_engine::{BookingCoordinator, IdempotencyService};
use reservo_policy::PolicyService;
use reservo_testing::{InMemoryStores, TestClock};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, h, m, 0).unwrap()
}

struct Pipeline {
    stores: InMemoryStores,
    clock: TestClock,
    relay: OutboxRelay,
    dispatcher: Dispatcher,
    provider: Arc<ScriptedProvider>,
    tenant: TenantId,
    customer: CustomerId,
}

fn pipeline(config: NotificationConfig) -> Pipeline {
    let stores = InMemoryStores::new();
    let clock = TestClock::at(at(12, 0));
    let shared: SharedClock = Arc::new(clock.clone());
    let tenant = TenantId::new();
    let customer = CustomerId::new();

    stores.add_customer(Customer {
        id: customer,
        tenant_id: tenant,
        active: true,
        blacklisted: false,
        max_concurrent: 5,
        language: None,
        email: Some("c@example.com".into()),
        phone: Some("+81-90-0000-0000".into()),
    });

    let store_arc = Arc::new(stores.clone());
    let provider = Arc::new(ScriptedProvider::delivering());
    let mut providers: HashMap<Channel, Arc<dyn NotificationProvider>> = HashMap::new();
    providers.insert(Channel::Email, provider.clone());
    providers.insert(Channel::Sms, provider.clone());

    let relay = OutboxRelay::new(
        store_arc.clone(),
        store_arc.clone(),
        store_arc.clone(),
        shared.clone(),
        config.clone(),
        "relay-1",
    );
    let dispatcher = Dispatcher::new(
        store_arc.clone(),
        store_arc.clone(),
        store_arc,
        shared,
        config,
        providers,
    );

    Pipeline {
        stores,
        clock,
        relay,
        dispatcher,
        provider,
        tenant,
        customer,
    }
}

fn booking_event(p: &Pipeline) -> NewOutboxEvent {
    NewOutboxEvent {
        event_type: event_types::BOOKING_CREATED.to_string(),
        aggregate_type: "booking".to_string(),
        aggregate_id: "booking-1".to_string(),
        payload: serde_json::json!({
            "bookingId": "booking-1",
            "customerId": p.customer,
            "startAt": "2025-03-10T10:00:00Z",
        }),
        trace_id: None,
        correlation_id: None,
    }
}

#[tokio::test]
async fn relay_translates_each_event_into_one_dispatch_per_channel_recipient() {
    let p = pipeline(NotificationConfig::default());
    p.stores.append(p.tenant, booking_event(&p)).await.unwrap();
    p.clock.advance(chrono::Duration::seconds(1));

    let published = p.relay.run_once().await.unwrap();
    assert_eq!(published, 1);

    let rows = p.stores.dispatch_rows();
    // Email + SMS (recipient has both addresses; push/LINE/webhook have no
    // registration).
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.status == DispatchStatus::Pending));
    assert!(rows.iter().all(|r| r.template_type == "booking_created"));

    let outbox = p.stores.outbox_events();
    assert!(outbox.iter().all(|e| e.status == OutboxStatus::Published));
}

#[tokio::test]
async fn crash_redelivery_does_not_duplicate_dispatches() {
    let p = pipeline(NotificationConfig::default());
    p.stores.append(p.tenant, booking_event(&p)).await.unwrap();
    p.clock.advance(chrono::Duration::seconds(1));

    p.relay.run_once().await.unwrap();
    assert_eq!(p.stores.dispatch_rows().len(), 2);

    // Simulate a crash between translation and mark-published: force the
    // row back to pending and drain again.
    let event = p.stores.outbox_events().pop().unwrap();
    p.stores
        .mark_failed(event.id, "worker died", p.clock.now(), false)
        .await
        .unwrap();
    p.clock.advance(chrono::Duration::seconds(1));
    p.relay.run_once().await.unwrap();

    // The (outbox event, channel, recipient) key holds: still two rows.
    assert_eq!(p.stores.dispatch_rows().len(), 2);
}

#[tokio::test]
async fn dispatcher_delivers_and_records_external_id() {
    let p = pipeline(NotificationConfig::default());
    p.stores.append(p.tenant, booking_event(&p)).await.unwrap();
    p.clock.advance(chrono::Duration::seconds(1));
    p.relay.run_once().await.unwrap();

    let outcomes = p.dispatcher.pump().await.unwrap();
    assert_eq!(outcomes.len(), 2);

    let rows = p.stores.dispatch_rows();
    assert!(rows.iter().all(|r| r.status == DispatchStatus::Sent));
    assert!(rows.iter().all(|r| r.external_id.is_some()));
    assert_eq!(p.provider.sent().len(), 2);
}

#[tokio::test]
async fn retryable_failure_requeues_with_backoff_then_succeeds() {
    let p = pipeline(NotificationConfig::default());
    p.stores.append(p.tenant, booking_event(&p)).await.unwrap();
    p.clock.advance(chrono::Duration::seconds(1));
    p.relay.run_once().await.unwrap();

    // Both channel attempts fail transiently once.
    p.provider.push_response(ProviderResponse::Retryable {
        error: "vendor 503".into(),
    });
    p.provider.push_response(ProviderResponse::Retryable {
        error: "vendor 503".into(),
    });
    p.dispatcher.pump().await.unwrap();

    let rows = p.stores.dispatch_rows();
    assert!(rows.iter().all(|r| r.status == DispatchStatus::Pending));
    assert!(rows.iter().all(|r| r.attempts == 1));
    assert!(rows.iter().all(|r| r.next_attempt_at > p.clock.now()));

    // Past the backoff, the scripted default delivers.
    p.clock.advance(chrono::Duration::minutes(10));
    p.dispatcher.pump().await.unwrap();
    let rows = p.stores.dispatch_rows();
    assert!(rows.iter().all(|r| r.status == DispatchStatus::Sent));
}

#[tokio::test]
async fn permanent_failure_stops_retrying() {
    let p = pipeline(NotificationConfig::default());
    p.stores.append(p.tenant, booking_event(&p)).await.unwrap();
    p.clock.advance(chrono::Duration::seconds(1));
    p.relay.run_once().await.unwrap();

    p.provider.push_response(ProviderResponse::Permanent {
        error: "address rejected".into(),
    });
    p.provider.push_response(ProviderResponse::Permanent {
        error: "address rejected".into(),
    });
    p.dispatcher.pump().await.unwrap();

    let rows = p.stores.dispatch_rows();
    assert!(rows.iter().all(|r| r.status == DispatchStatus::Failed));
    assert!(rows.iter().all(|r| r.last_error.as_deref() == Some("address rejected")));

    // No further deliveries on subsequent pumps.
    p.clock.advance(chrono::Duration::hours(1));
    let outcomes = p.dispatcher.pump().await.unwrap();
    assert!(outcomes.is_empty());
}

#[tokio::test]
async fn disabled_channel_suppresses_dispatch() {
    let p = pipeline(NotificationConfig::default());
    p.stores.set_preferences(NotificationPreferences {
        customer_id: p.customer,
        tenant_id: p.tenant,
        enabled_channels: vec![Channel::Email],
        disabled_types: Vec::new(),
        quiet_hours: None,
    });
    p.stores.append(p.tenant, booking_event(&p)).await.unwrap();
    p.clock.advance(chrono::Duration::seconds(1));
    p.relay.run_once().await.unwrap();

    // Relay already respects preferences: only the email row exists.
    let rows = p.stores.dispatch_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].channel, Channel::Email);
}

// ───────────────────────── webhook ingress ────────────────────────────────

type HmacSha256 = Hmac<Sha256>;

fn sign(secret: &[u8], timestamp: i64, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).unwrap();
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

fn ingress_for(p: &Pipeline) -> WebhookIngress {
    let store_arc = Arc::new(p.stores.clone());
    let shared: SharedClock = Arc::new(p.clock.clone());
    let policy = Arc::new(PolicyService::new(
        store_arc.clone(),
        store_arc.clone(),
        store_arc.clone(),
        shared.clone(),
        EngineConfig::default().booking,
        0,
    ));
    let idempotency = Arc::new(IdempotencyService::new(
        store_arc.clone(),
        None,
        shared.clone(),
        EngineConfig::default().idempotency,
    ));
    let coordinator = Arc::new(BookingCoordinator::new(
        policy,
        idempotency,
        store_arc.clone(),
        store_arc.clone(),
        None,
        shared.clone(),
        EngineConfig::default(),
    ));
    WebhookIngress::new(store_arc.clone(), store_arc, coordinator, shared, *b"whsec_test")
}

#[tokio::test]
async fn valid_signature_verifies_and_tampering_fails() {
    let p = pipeline(NotificationConfig::default());
    let ingress = ingress_for(&p);
    let body = br#"{"id":"evt-1","type":"noop"}"#;
    let timestamp = p.clock.now().timestamp();

    let header = sign(b"whsec_test", timestamp, body);
    assert!(ingress.verify(&header, body).is_ok());

    // Tampered body.
    assert!(ingress.verify(&header, br#"{"id":"evt-2"}"#).is_err());
    // Stale timestamp.
    let stale = sign(b"whsec_test", timestamp - 600, body);
    assert!(ingress.verify(&stale, body).is_err());
    // Wrong secret.
    let wrong = sign(b"whsec_nope", timestamp, body);
    assert!(ingress.verify(&wrong, body).is_err());
}

#[tokio::test]
async fn replayed_webhook_is_acknowledged_but_not_reprocessed() {
    let p = pipeline(NotificationConfig::default());
    let ingress = ingress_for(&p);

    // Deliver a dispatch first so the status callback has a target.
    p.stores.append(p.tenant, booking_event(&p)).await.unwrap();
    p.clock.advance(chrono::Duration::seconds(1));
    p.relay.run_once().await.unwrap();
    p.dispatcher.pump().await.unwrap();
    let external_id = p.stores.dispatch_rows()[0].external_id.clone().unwrap();

    let body = serde_json::json!({
        "id": "evt-42",
        "type": "delivery.updated",
        "data": { "externalId": external_id, "status": "delivered" },
    })
    .to_string();

    let first = ingress.handle("mailer", body.as_bytes()).await.unwrap();
    assert!(first.received && first.processed);
    let row = p
        .stores
        .dispatch_rows()
        .into_iter()
        .find(|r| r.external_id.as_deref() == Some(external_id.as_str()))
        .unwrap();
    assert_eq!(row.status, DispatchStatus::Delivered);
    assert!(row.delivered_at.is_some());

    let replay = ingress.handle("mailer", body.as_bytes()).await.unwrap();
    assert!(replay.received);
    assert!(!replay.processed);
}
