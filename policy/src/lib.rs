//! Policy evaluation for the reservation engine.
//!
//! Validation is split in two layers: [`PolicyService`] loads reference
//! data through the store seams, and the pure functions in [`validate`]
//! and [`hours`] evaluate it. Errors accumulate; warnings never fail a
//! request; suggestions point the caller at the nearest workable
//! alternative. There is no control flow by exception; the outcome type
//! carries everything.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cancellation;
pub mod hours;
pub mod outcome;
pub mod service;
pub mod validate;

pub use cancellation::{evaluate_cancellation, CancellationDecision};
pub use outcome::{Suggestion, ValidationOutcome};
pub use service::PolicyService;
pub use validate::{validate_request, ValidationContext};
