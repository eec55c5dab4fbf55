//! The reservation engine.
//!
//! [`BookingCoordinator`] is the single entry point for confirming and
//! cancelling reservations. It composes the policy validator, the
//! dual-tier idempotency service, the transactional booking store, and the
//! retry loop into the pipeline:
//!
//! ```text
//! idempotency check ─► policy validation ─► canonical lock plan
//!        ─► [retry] reserve + persist + outbox in ONE transaction
//!        ─► idempotency complete (after commit)
//! ```
//!
//! [`saga`] hosts the compensation coordinator for flows that span
//! services (capacity + payment authorization), [`maintenance`] the
//! background sweepers, and [`availability`] the cached read path.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod availability;
pub mod coordinator;
pub mod idempotency;
pub mod maintenance;
pub mod payment;
pub mod saga;

pub use availability::{availability_tag, AvailabilityPage, AvailabilityService};
pub use coordinator::{BookingCoordinator, CancelRequest, CancelResponse, ConfirmResponse};
pub use idempotency::{IdempotencyService, IdempotencyStats};
pub use maintenance::Maintenance;
pub use payment::{PaymentGateway, PaymentIntent, ProviderFault};
pub use saga::{
    AuthorizePaymentStep, ReserveCapacityStep, SagaContext, SagaCoordinator, SagaRunOutcome,
    SagaStep,
};
