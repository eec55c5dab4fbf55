//! PostgreSQL persistence for the reservation engine.
//!
//! One struct per store seam, all sharing a [`sqlx::PgPool`] built by the
//! [`gateway`]. Queries are runtime-checked (`sqlx::query` with binds) and
//! mapped through small row helpers; SQLSTATE 40001/40P01 failures are
//! classified retryable so the engine's retry loop can re-drive the whole
//! transaction.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod booking;
pub mod catalog;
pub mod dispatch;
pub mod gateway;
pub mod idempotency;
pub mod inventory;
pub mod outbox;
pub mod saga;
pub mod webhook;

pub use booking::PgBookingStore;
pub use catalog::PgCatalogStore;
pub use dispatch::PgDispatchStore;
pub use gateway::{map_sqlx_error, IsolationLevel, PostgresConfig};
pub use idempotency::PgIdempotencyStore;
pub use inventory::PgInventoryStore;
pub use outbox::PgOutboxStore;
pub use saga::PgSagaStore;
pub use webhook::PgWebhookDedupStore;
