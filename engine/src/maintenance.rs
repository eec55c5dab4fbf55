//! Background maintenance tasks.
//!
//! Four sweeps keep the engine healthy:
//!
//! - tentative expiry: expired holds re-open capacity synchronously and
//!   the booking moves to `cancelled(PAYMENT_FAILED)`;
//! - idempotency sweep: expired records are deleted in batches;
//! - timeslot retention: slots older than the retention window go away;
//! - reconciliation: `processing` idempotency records older than the
//!   stale threshold are matched to their booking (crash between commit
//!   and complete) and settled.

use crate::idempotency::IdempotencyService;
use chrono::Duration;
use reservo_core::clock::SharedClock;
use reservo_core::config::EngineConfig;
use reservo_core::domain::booking::{Booking, BookingChange, BookingStatus, CancellationReason};
use reservo_core::domain::idempotency::{IdempotencyStatus, ResponseMeta, StageTimings};
use reservo_core::domain::outbox::{event_types, NewOutboxEvent};
use reservo_core::error::CoreError;
use reservo_core::ids::TenantId;
use reservo_core::stores::booking::{
    BookingStore, ReservationItem, TransitionCommand, TransitionOutcome,
};
use reservo_core::stores::{IdempotencyStore, InventoryStore};
use std::sync::Arc;
use tokio::sync::watch;

/// Runs the periodic sweeps.
pub struct Maintenance {
    bookings: Arc<dyn BookingStore>,
    inventory: Arc<dyn InventoryStore>,
    idempotency: Arc<IdempotencyService>,
    idempotency_store: Arc<dyn IdempotencyStore>,
    clock: SharedClock,
    config: EngineConfig,
}

impl Maintenance {
    /// Wire up the maintenance tasks.
    #[must_use]
    pub fn new(
        bookings: Arc<dyn BookingStore>,
        inventory: Arc<dyn InventoryStore>,
        idempotency: Arc<IdempotencyService>,
        idempotency_store: Arc<dyn IdempotencyStore>,
        clock: SharedClock,
        config: EngineConfig,
    ) -> Self {
        Self {
            bookings,
            inventory,
            idempotency,
            idempotency_store,
            clock,
            config,
        }
    }

    /// Expire tentative bookings whose hold ran out: release their
    /// capacity in the same transaction that cancels them. Returns how
    /// many bookings were expired.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] on persistence failure; per-booking failures
    /// are logged and skipped so one stuck row cannot stall the sweep.
    pub async fn expire_tentative(&self) -> Result<u64, CoreError> {
        let now = self.clock.now();
        let expired = self.bookings.find_expired_tentative(now, 100).await?;
        let mut released = 0u64;
        for booking in expired {
            match self.expire_one(&booking).await {
                Ok(()) => released += 1,
                Err(err) => {
                    tracing::warn!(booking = %booking.id, error = %err, "tentative expiry failed");
                }
            }
        }
        if released > 0 {
            tracing::info!(released, "tentative bookings expired");
            metrics::counter!("maintenance.tentative_expired").increment(released);
        }
        Ok(released)
    }

    async fn expire_one(&self, booking: &Booking) -> Result<(), CoreError> {
        let items = self.bookings.items(booking.tenant_id, booking.id).await?;
        let mut release_items = Vec::with_capacity(items.len());
        for item in &items {
            let slot = self
                .inventory
                .timeslot(booking.tenant_id, item.timeslot_id)
                .await?;
            let Some(slot) = slot else {
                continue; // slot already cleaned up; nothing to re-open
            };
            release_items.push(ReservationItem {
                timeslot_id: item.timeslot_id,
                resource_id: item.resource_id,
                capacity: item.reserved_capacity,
                expected_version: slot.version,
            });
        }
        release_items.sort_by_key(|item| (item.resource_id, item.timeslot_id));

        let now = self.clock.now();
        let outcome = self
            .bookings
            .execute_transition(TransitionCommand {
                tenant_id: booking.tenant_id,
                booking_id: booking.id,
                expect_status: BookingStatus::Tentative,
                new_status: BookingStatus::Cancelled,
                release_items,
                events: vec![NewOutboxEvent::for_booking(
                    event_types::BOOKING_CANCELLED,
                    booking.id,
                    serde_json::json!({
                        "bookingId": booking.id,
                        "customerId": booking.customer_id,
                        "reason": CancellationReason::PaymentFailed.as_str(),
                    }),
                    None,
                )],
                change: BookingChange {
                    booking_id: booking.id,
                    old_status: Some(BookingStatus::Tentative),
                    new_status: BookingStatus::Cancelled,
                    old_start_at: Some(booking.start_at),
                    new_start_at: booking.start_at,
                    reason: Some(CancellationReason::PaymentFailed.as_str().to_string()),
                    actor: "tentative-expiry".to_string(),
                    changed_at: now,
                },
                clear_expiry: false,
            })
            .await?;

        match outcome {
            TransitionOutcome::Committed { .. } => Ok(()),
            // Raced with a payment confirmation or another sweep: done.
            TransitionOutcome::StatusConflict { .. } => Ok(()),
            TransitionOutcome::ItemFailed { outcome, .. } => Err(CoreError::Internal(format!(
                "capacity re-open failed: {outcome:?}"
            ))),
        }
    }

    /// One idempotency sweeper pass.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] on persistence failure.
    pub async fn sweep_idempotency(&self) -> Result<u64, CoreError> {
        Ok(self.idempotency.sweep().await?)
    }

    /// One timeslot retention pass for a tenant.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] on persistence failure.
    pub async fn cleanup_timeslots(&self, tenant_id: TenantId) -> Result<u64, CoreError> {
        let before = self.clock.now() - Duration::days(self.config.cleanup.retention_days);
        Ok(self
            .inventory
            .cleanup_expired(tenant_id, before, self.config.cleanup.batch_size)
            .await?)
    }

    /// Settle `processing` idempotency records older than the stale
    /// threshold: a persisted booking under the same key means the commit
    /// happened and the record completes with the real response; no
    /// booking means the attempt died before commit and the record fails
    /// so a retry may claim the key. Returns how many were settled.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError`] on persistence failure.
    pub async fn reconcile_stale_processing(&self) -> Result<u64, CoreError> {
        let now = self.clock.now();
        let threshold = now - Duration::minutes(self.config.idempotency.stale_threshold_minutes);
        let stale = self
            .idempotency_store
            .find_stale_processing(threshold, 100)
            .await?;

        let mut settled = 0u64;
        for record in stale {
            let booking = self
                .bookings
                .find_by_idempotency_key(record.tenant_id, &record.key)
                .await?;
            let moved = match booking {
                Some(booking) => {
                    let response = ResponseMeta {
                        status: 201,
                        body: serde_json::json!({
                            "bookingId": booking.id,
                            "status": booking.status.as_str(),
                            "totalMinor": booking.total_minor,
                            "expiresAt": booking.expires_at,
                        }),
                    };
                    self.idempotency_store
                        .transition(
                            record.tenant_id,
                            &record.key,
                            IdempotencyStatus::Processing,
                            IdempotencyStatus::Completed,
                            Some(&response),
                            StageTimings::default(),
                            now,
                        )
                        .await?
                }
                None => {
                    self.idempotency_store
                        .transition(
                            record.tenant_id,
                            &record.key,
                            IdempotencyStatus::Processing,
                            IdempotencyStatus::Failed,
                            None,
                            StageTimings::default(),
                            now,
                        )
                        .await?
                }
            };
            if moved {
                settled += 1;
                tracing::info!(key = %record.key, "stale processing record reconciled");
            }
        }
        if settled > 0 {
            metrics::counter!("maintenance.reconciled").increment(settled);
        }
        Ok(settled)
    }

    /// Run every sweep on its interval until `shutdown` flips to `true`.
    /// Intended to be spawned; exits cleanly on shutdown for a graceful
    /// drain.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let interval = std::time::Duration::from_secs(
            u64::try_from(self.config.cleanup.interval_minutes.max(1)).unwrap_or(5) * 60,
        );
        let sweep_interval =
            std::time::Duration::from_secs(self.config.idempotency.sweep_interval_secs.max(1));
        let mut cleanup_tick = tokio::time::interval(interval);
        let mut sweep_tick = tokio::time::interval(sweep_interval);

        loop {
            tokio::select! {
                _ = cleanup_tick.tick() => {
                    if let Err(err) = self.expire_tentative().await {
                        tracing::error!(error = %err, "tentative expiry sweep failed");
                    }
                    if let Err(err) = self.reconcile_stale_processing().await {
                        tracing::error!(error = %err, "reconciliation sweep failed");
                    }
                }
                _ = sweep_tick.tick() => {
                    if let Err(err) = self.sweep_idempotency().await {
                        tracing::error!(error = %err, "idempotency sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("maintenance loop draining");
                        return;
                    }
                }
            }
        }
    }
}
