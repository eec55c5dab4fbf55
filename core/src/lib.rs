//! Core domain model for the Reservo reservation engine.
//!
//! This crate holds everything the other crates agree on: typed identifiers,
//! the entities of the reservation domain (timeslots, bookings, idempotency
//! records, outbox events, notification dispatches), the error taxonomy with
//! its stable wire codes, configuration structures, and the store traits that
//! the Postgres and in-memory implementations both satisfy.
//!
//! The crate is deliberately free of I/O: it compiles without a database,
//! cache, or HTTP stack, which keeps the policy and engine crates testable
//! against in-memory stores.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod fingerprint;
pub mod ids;
pub mod stores;
pub mod timegrid;

pub use clock::{Clock, SystemClock};
pub use error::{CoreError, ErrorCode, FieldError, StoreError};
