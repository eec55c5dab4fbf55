//! Reservo server binary.
//!
//! Wires the Postgres stores, the two-tier cache, the booking engine, the
//! outbox relay, the notification dispatcher, and the HTTP surface; drains
//! gracefully on SIGTERM.

use anyhow::Context;
use reservo_cache::{RedisTier, TieredCache};
use reservo_core::clock::system_clock;
use reservo_dispatch::provider::{ConsoleProvider, NotificationProvider};
use reservo_dispatch::{Dispatcher, OutboxRelay, WebhookIngress};
use reservo_engine::{AvailabilityService, BookingCoordinator, IdempotencyService, Maintenance};
use reservo_policy::PolicyService;
use reservo_postgres::{
    PgBookingStore, PgCatalogStore, PgDispatchStore, PgIdempotencyStore, PgInventoryStore,
    PgOutboxStore, PgWebhookDedupStore,
};
use reservo_runtime::rate_limit::{RateLimiterRegistry, TokenBucketConfig};
use reservo_web::config::Config;
use reservo_web::handlers::availability::PUBLIC_RATE_PER_MINUTE;
use reservo_web::{router, AppState};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("fatal: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    let clock = system_clock();

    let pool = config
        .postgres
        .connect()
        .await
        .context("database pool construction failed")?;
    sqlx::migrate!("../postgres/migrations")
        .run(&pool)
        .await
        .context("migrations failed")?;

    let cache = if config.redis.enabled {
        let tier = RedisTier::connect(&config.redis.url, &config.redis.key_prefix)
            .await
            .context("redis connection failed")?;
        Arc::new(TieredCache::with_redis(4096, tier))
    } else {
        Arc::new(TieredCache::in_process(4096))
    };

    let inventory = Arc::new(PgInventoryStore::new(pool.clone()));
    let bookings = Arc::new(PgBookingStore::new(pool.clone()));
    let catalog = Arc::new(PgCatalogStore::new(pool.clone()));
    let outbox = Arc::new(PgOutboxStore::new(pool.clone()));
    let dispatches = Arc::new(PgDispatchStore::new(pool.clone()));
    let idempotency_store = Arc::new(PgIdempotencyStore::new(pool.clone()));
    let webhook_dedup = Arc::new(PgWebhookDedupStore::new(pool));

    let policy = Arc::new(PolicyService::new(
        catalog.clone(),
        inventory.clone(),
        bookings.clone(),
        clock.clone(),
        config.engine.booking.clone(),
        config.tenant_utc_offset_minutes,
    ));
    let idempotency = Arc::new(IdempotencyService::new(
        idempotency_store.clone(),
        None,
        clock.clone(),
        config.engine.idempotency.clone(),
    ));
    let coordinator = Arc::new(BookingCoordinator::new(
        policy,
        idempotency.clone(),
        bookings.clone(),
        inventory.clone(),
        Some(cache.clone()),
        clock.clone(),
        config.engine.clone(),
    ));
    let availability = Arc::new(AvailabilityService::new(inventory.clone(), cache));
    let ingress = Arc::new(WebhookIngress::new(
        webhook_dedup,
        dispatches.clone(),
        coordinator.clone(),
        clock.clone(),
        config.webhook_secret.as_bytes().to_vec(),
    ));

    // Background workers share one shutdown signal.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let relay = Arc::new(OutboxRelay::new(
        outbox.clone(),
        dispatches.clone(),
        catalog.clone(),
        clock.clone(),
        config.engine.notification.clone(),
        "relay-1",
    ));
    tokio::spawn(relay.run(shutdown_rx.clone()));

    let mut providers: HashMap<_, Arc<dyn NotificationProvider>> = HashMap::new();
    for channel in reservo_core::domain::notification::Channel::ALL {
        providers.insert(channel, Arc::new(ConsoleProvider) as Arc<dyn NotificationProvider>);
    }
    let dispatcher = Arc::new(Dispatcher::new(
        dispatches,
        catalog.clone(),
        outbox,
        clock.clone(),
        config.engine.notification.clone(),
        providers,
    ));
    tokio::spawn(dispatcher.run(shutdown_rx.clone()));

    let maintenance = Arc::new(Maintenance::new(
        bookings,
        inventory,
        idempotency,
        idempotency_store,
        clock.clone(),
        config.engine.clone(),
    ));
    tokio::spawn(maintenance.run(shutdown_rx));

    let state = AppState {
        coordinator,
        availability,
        ingress,
        catalog,
        public_limiter: Arc::new(RateLimiterRegistry::new(TokenBucketConfig::per_minute(
            PUBLIC_RATE_PER_MINUTE,
        ))),
        clock,
        config: Arc::new(config.engine.clone()),
    };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind failed")?;
    tracing::info!(%addr, "reservo server listening");

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
        tracing::info!("shutdown signal received, draining");
    })
    .await
    .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut signal) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            signal.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
