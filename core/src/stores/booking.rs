//! Booking store seam: the transactional unit of work.
//!
//! The confirm and transition commands bundle everything that must share a
//! commit fate: capacity mutations, the booking row, its items, the outbox
//! events, and the audit record. Implementations run each command inside a
//! single database transaction; any failure rolls the whole command back.

use crate::domain::booking::{Booking, BookingChange, BookingItem, BookingStatus};
use crate::domain::inventory::ReserveOutcome;
use crate::domain::outbox::NewOutboxEvent;
use crate::error::StoreError;
use crate::ids::{BookingId, CustomerId, ResourceId, TenantId, TimeslotId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One capacity claim inside a transactional command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationItem {
    /// Target timeslot.
    pub timeslot_id: TimeslotId,
    /// Owning resource; first component of the canonical lock order.
    pub resource_id: ResourceId,
    /// Units to reserve (confirm) or release (transition).
    pub capacity: i32,
    /// Timeslot version the caller read.
    pub expected_version: i64,
}

/// Everything a confirm commits atomically.
#[derive(Debug, Clone)]
pub struct ConfirmCommand {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// The booking row to insert.
    pub booking: Booking,
    /// Items in canonical lock order `(resource_id, timeslot_id)`.
    pub items: Vec<ReservationItem>,
    /// Outbox events sharing the commit fate.
    pub events: Vec<NewOutboxEvent>,
    /// Audit record of the creation.
    pub change: BookingChange,
}

/// Result of a confirm command.
#[derive(Debug, Clone)]
pub enum ConfirmOutcome {
    /// Everything committed.
    Committed {
        /// The persisted booking.
        booking: Booking,
        /// New `(timeslot, version)` pairs after the capacity writes.
        new_versions: Vec<(TimeslotId, i64)>,
    },
    /// An item failed; the transaction was rolled back.
    ItemFailed {
        /// Index into `ConfirmCommand::items`.
        index: usize,
        /// What went wrong on that item.
        outcome: ReserveOutcome,
    },
}

/// A status transition (cancel, expire, payment-confirm) with optional
/// capacity releases, committed atomically with its outbox events.
#[derive(Debug, Clone)]
pub struct TransitionCommand {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Target booking.
    pub booking_id: BookingId,
    /// Status the booking must currently hold.
    pub expect_status: BookingStatus,
    /// Status to move to.
    pub new_status: BookingStatus,
    /// Capacity to release, in canonical lock order; empty when the
    /// transition does not touch capacity.
    pub release_items: Vec<ReservationItem>,
    /// Outbox events sharing the commit fate.
    pub events: Vec<NewOutboxEvent>,
    /// Audit record of the transition.
    pub change: BookingChange,
    /// Clear `expires_at` on success (payment confirmation path).
    pub clear_expiry: bool,
}

/// Result of a transition command.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// Everything committed.
    Committed {
        /// The booking after the transition.
        booking: Booking,
    },
    /// The booking was not in `expect_status`; nothing changed.
    StatusConflict {
        /// Status actually found.
        current: BookingStatus,
    },
    /// A release failed; the transaction was rolled back.
    ItemFailed {
        /// Index into `TransitionCommand::release_items`.
        index: usize,
        /// What went wrong on that item.
        outcome: ReserveOutcome,
    },
}

/// Bookings, their items, and their audit trail.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Run a confirm command in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure (retryable
    /// serialization conflicts included); item-level conditions come back
    /// as [`ConfirmOutcome::ItemFailed`].
    async fn execute_confirm(&self, cmd: ConfirmCommand) -> Result<ConfirmOutcome, StoreError>;

    /// Run a status transition in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn execute_transition(
        &self,
        cmd: TransitionCommand,
    ) -> Result<TransitionOutcome, StoreError>;

    /// Fetch a booking.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn get(
        &self,
        tenant_id: TenantId,
        booking_id: BookingId,
    ) -> Result<Option<Booking>, StoreError>;

    /// Items of a booking.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn items(
        &self,
        tenant_id: TenantId,
        booking_id: BookingId,
    ) -> Result<Vec<BookingItem>, StoreError>;

    /// Find the booking created under an idempotency key, if any. Used by
    /// the stale-`processing` reconciliation sweep.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn find_by_idempotency_key(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<Booking>, StoreError>;

    /// Active (tentative or confirmed) bookings of a customer overlapping
    /// `[from, to)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn overlapping_active(
        &self,
        tenant_id: TenantId,
        customer_id: CustomerId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Booking>, StoreError>;

    /// Count of a customer's active bookings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn active_count(
        &self,
        tenant_id: TenantId,
        customer_id: CustomerId,
    ) -> Result<i64, StoreError>;

    /// Tentative bookings whose `expires_at` has passed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn find_expired_tentative(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Booking>, StoreError>;

    /// Append an audit record outside a transition (administrative notes).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn append_change(&self, change: &BookingChange) -> Result<(), StoreError>;
}
