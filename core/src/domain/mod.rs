//! Domain entities.
//!
//! Plain data types shared by every crate. Status enums carry
//! `as_str`/`parse` pairs for database round-trips; the structs are the
//! single representation of each entity, with serde attributes providing the
//! wire names.

pub mod booking;
pub mod catalog;
pub mod idempotency;
pub mod inventory;
pub mod notification;
pub mod outbox;
pub mod saga;

pub use booking::{
    Booking, BookingChange, BookingItem, BookingRequest, BookingRequestItem, BookingStatus,
    CancellationReason, SlotSuggestion,
};
pub use catalog::{BusinessHours, Customer, Holiday, Resource, ResourceStatus, ResourceTimeOff, Service};
pub use idempotency::{
    CheckOutcome, IdempotencyConflict, IdempotencyRecord, IdempotencyStatus, RequestMeta,
    ResponseMeta, StageTimings,
};
pub use inventory::{
    AvailabilityProbe, AvailabilityReport, AvailableSlot, CapacityMutation, MutationKind,
    MutationResult, ReserveOutcome, ResourceKind, Timeslot, TimeslotSeed,
};
pub use notification::{
    Channel, DispatchStatus, NewDispatch, NotificationDispatch, NotificationPreferences,
    NotificationTemplate, Priority, ProviderResponse, QuietHours,
};
pub use outbox::{event_types, NewOutboxEvent, OutboxEvent, OutboxStatus};
pub use saga::{ParticipantStatus, SagaExecution, SagaStatus, TransactionParticipant};
