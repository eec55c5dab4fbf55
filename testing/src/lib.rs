//! Test doubles for the reservation engine.
//!
//! [`InMemoryStores`] implements every store seam over one shared,
//! mutex-guarded world with the same observable semantics as the Postgres
//! implementations: monotonic timeslot versions, capacity bounds, the
//! `(key, tenant)` idempotency gate, claim semantics, and the dispatch
//! dedup key. [`TestClock`] pins time. Engine, dispatch, and web tests run
//! against these without Postgres or Redis.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod stores;

pub use clock::TestClock;
pub use stores::{InMemoryIdempotencyCache, InMemoryStores};
