//! Store traits.
//!
//! These traits are the seams between the engine and its persistence. The
//! `reservo-postgres` crate provides the production implementations; the
//! `reservo-testing` crate provides in-memory ones with the same observable
//! semantics. The engine depends only on the traits.

pub mod booking;
pub mod catalog;
pub mod dispatch;
pub mod idempotency;
pub mod inventory;
pub mod outbox;
pub mod saga;
pub mod webhook;

pub use booking::{
    BookingStore, ConfirmCommand, ConfirmOutcome, ReservationItem, TransitionCommand,
    TransitionOutcome,
};
pub use catalog::CatalogStore;
pub use dispatch::DispatchStore;
pub use idempotency::{IdempotencyCache, IdempotencyStore};
pub use inventory::InventoryStore;
pub use outbox::{OutboxCounts, OutboxStore};
pub use saga::SagaStore;
pub use webhook::WebhookDedupStore;
