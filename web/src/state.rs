//! Shared application state.

use reservo_core::clock::SharedClock;
use reservo_core::config::EngineConfig;
use reservo_core::stores::CatalogStore;
use reservo_dispatch::WebhookIngress;
use reservo_engine::{AvailabilityService, BookingCoordinator};
use reservo_runtime::rate_limit::RateLimiterRegistry;
use std::sync::Arc;

/// Everything handlers need, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Booking confirm/cancel pipeline.
    pub coordinator: Arc<BookingCoordinator>,
    /// Cached availability reads.
    pub availability: Arc<AvailabilityService>,
    /// Webhook verification and routing.
    pub ingress: Arc<WebhookIngress>,
    /// Catalog reads (resource resolution for availability).
    pub catalog: Arc<dyn CatalogStore>,
    /// Per-`(ip, tenant)` limiter for the public availability endpoint.
    pub public_limiter: Arc<RateLimiterRegistry>,
    /// Clock shared with the engine.
    pub clock: SharedClock,
    /// Engine configuration.
    pub config: Arc<EngineConfig>,
}
