//! HTTP surface for the reservation engine.
//!
//! Three route groups: the bit-exact public availability feed, the
//! administrative booking API (camelCase JSON, `Idempotency-Key` aware),
//! and the provider webhook endpoint (raw-body HMAC verification).
//! Errors render as `{code, message, details[]}` with the engine's stable
//! codes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod state;

pub use error::ApiError;
pub use state::AppState;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

/// Build the router over the shared state.
///
/// The capability table mirrors route registration: the admin group
/// requires `bookings:write`; the public feed and webhooks carry their own
/// protections (rate limit, signature).
#[must_use]
pub fn router(state: AppState) -> Router {
    let capabilities = Arc::new(
        middleware::CapabilityTable::new().require("/v1/admin", "bookings:write"),
    );

    Router::new()
        .route(
            "/v1/public/availability",
            get(handlers::availability::get_availability),
        )
        .route("/v1/admin/bookings", post(handlers::bookings::create_booking))
        .route(
            "/v1/admin/bookings/:id/cancel",
            post(handlers::bookings::cancel_booking),
        )
        .route(
            "/v1/webhooks/:provider",
            post(handlers::webhooks::receive_webhook),
        )
        .layer(axum::middleware::from_fn(
            move |request: axum::extract::Request, next: axum::middleware::Next| {
                let table = Arc::clone(&capabilities);
                middleware::enforce_capabilities(table, request, next)
            },
        ))
        .with_state(state)
}
