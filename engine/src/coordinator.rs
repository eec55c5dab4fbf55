//! Booking coordinator.
//!
//! The single entry point for confirm and cancel. The confirm pipeline:
//! idempotency check, policy validation, canonical lock-order plan, then a
//! bounded retry loop around the one-transaction unit of work. Version
//! mismatches refresh the stale item's expected version and re-drive the
//! loop; serialization failures and deadlocks back off exponentially. The
//! idempotency record is completed only after the transaction committed.

use crate::idempotency::IdempotencyService;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use reservo_cache::TieredCache;
use reservo_core::clock::SharedClock;
use reservo_core::config::EngineConfig;
use reservo_core::domain::booking::{
    Booking, BookingChange, BookingRequest, BookingStatus, CancellationReason,
};
use reservo_core::domain::idempotency::{RequestMeta, ResponseMeta, StageTimings};
use reservo_core::domain::inventory::ReserveOutcome;
use reservo_core::domain::outbox::{event_types, NewOutboxEvent};
use reservo_core::error::{CoreError, FieldError, StoreError};
use reservo_core::ids::{BookingId, TenantId};
use reservo_core::stores::booking::{
    BookingStore, ConfirmCommand, ConfirmOutcome, ReservationItem, TransitionCommand,
    TransitionOutcome,
};
use reservo_core::stores::InventoryStore;
use reservo_policy::{CancellationDecision, PolicyService, Suggestion, ValidationOutcome};
use reservo_runtime::retry::{retry_if, BackoffPolicy};
use std::fmt;
use std::sync::Arc;

/// Response of a successful confirm (also the cached replay body).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmResponse {
    /// The new booking's id.
    pub booking_id: BookingId,
    /// Its status (`confirmed`, or `tentative` when payment confirmation
    /// is required).
    pub status: BookingStatus,
    /// Total price in minor units.
    pub total_minor: i64,
    /// Expiry for tentative bookings.
    pub expires_at: Option<DateTime<Utc>>,
}

/// A cancel request as the coordinator receives it.
#[derive(Debug, Clone)]
pub struct CancelRequest {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Target booking.
    pub booking_id: BookingId,
    /// Why the booking is cancelled.
    pub reason: CancellationReason,
    /// Who is cancelling.
    pub actor: String,
}

/// Response of a successful cancel.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    /// The cancelled booking's id.
    pub booking_id: BookingId,
    /// Always `cancelled`.
    pub status: BookingStatus,
    /// Penalty withheld, in minor units.
    pub penalty_minor: i64,
    /// Amount refunded, in minor units.
    pub refund_minor: i64,
}

/// Error carried through the retry loop; only its retryable variants ever
/// reach the retry predicate.
#[derive(Debug)]
enum AttemptError {
    Store(StoreError),
    VersionRefresh,
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "{e}"),
            Self::VersionRefresh => write!(f, "timeslot version refreshed, retrying"),
        }
    }
}

/// Orchestrates the confirm/cancel pipelines.
pub struct BookingCoordinator {
    policy: Arc<PolicyService>,
    idempotency: Arc<IdempotencyService>,
    bookings: Arc<dyn BookingStore>,
    inventory: Arc<dyn InventoryStore>,
    cache: Option<Arc<TieredCache>>,
    clock: SharedClock,
    config: EngineConfig,
}

impl BookingCoordinator {
    /// Wire up the coordinator.
    #[must_use]
    pub fn new(
        policy: Arc<PolicyService>,
        idempotency: Arc<IdempotencyService>,
        bookings: Arc<dyn BookingStore>,
        inventory: Arc<dyn InventoryStore>,
        cache: Option<Arc<TieredCache>>,
        clock: SharedClock,
        config: EngineConfig,
    ) -> Self {
        Self {
            policy,
            idempotency,
            bookings,
            inventory,
            cache,
            clock,
            config,
        }
    }

    /// Confirm a reservation.
    ///
    /// # Errors
    ///
    /// Returns a [`CoreError`] carrying the stable code for every failure
    /// mode: validation, capacity, idempotency conflicts, or persistence.
    pub async fn confirm(
        &self,
        request: BookingRequest,
        meta: RequestMeta,
    ) -> Result<ConfirmResponse, CoreError> {
        let tenant_id = request.tenant_id;
        let key = request.idempotency_key.clone();
        let started = std::time::Instant::now();

        // 1. Idempotency gate.
        let check = self.idempotency.check(tenant_id, &key, &meta).await?;
        if let Some(cached) = check.cached_response {
            return serde_json::from_value(cached.body)
                .map_err(|e| CoreError::Internal(format!("corrupt cached response: {e}")));
        }
        if !check.proceed {
            if check.should_wait {
                return Err(CoreError::IdempotencyProcessing {
                    retry_after_ms: check.wait_ms,
                });
            }
            return Err(match check.conflict {
                Some(reservo_core::domain::idempotency::IdempotencyConflict::FingerprintMismatch) => {
                    CoreError::IdempotencyFingerprintConflict
                }
                _ => CoreError::IdempotencyProcessing { retry_after_ms: 0 },
            });
        }

        if !self.idempotency.start_processing(tenant_id, &key, &meta).await? {
            // A concurrent request claimed the key between check and claim.
            return Err(CoreError::IdempotencyProcessing {
                retry_after_ms: self.config.idempotency.wait_ms,
            });
        }

        // 2. Policy validation.
        let validation = self.policy.validate(&request).await?;
        if !validation.is_ok() {
            self.record_failure(tenant_id, &key, 422, &validation).await;
            return Err(CoreError::Validation {
                details: validation.errors,
            });
        }

        // 3. Canonical lock order, fixed booking identity across retries.
        let mut plan: Vec<ReservationItem> = request
            .items
            .iter()
            .map(|item| ReservationItem {
                timeslot_id: item.timeslot_id,
                resource_id: item.resource_id,
                capacity: item.capacity,
                expected_version: item.expected_version,
            })
            .collect();
        plan.sort_by_key(|item| (item.resource_id, item.timeslot_id));
        let booking_id = BookingId::new();

        // 4. Transaction with bounded retry.
        let outcome = self
            .drive_confirm_transaction(&request, booking_id, plan)
            .await;

        match outcome {
            Ok(booking) => {
                let response = ConfirmResponse {
                    booking_id: booking.id,
                    status: booking.status,
                    total_minor: booking.total_minor,
                    expires_at: booking.expires_at,
                };
                self.invalidate_availability(&request).await;

                let body = serde_json::to_value(&response)
                    .map_err(|e| CoreError::Internal(format!("encode response: {e}")))?;
                let timings = StageTimings {
                    processing_duration_ms: started.elapsed().as_millis() as u64,
                    ..StageTimings::default()
                };
                // Completed strictly after commit: a crash here leaves the
                // record `processing` for the reconciliation sweep.
                self.idempotency
                    .complete(tenant_id, &key, &ResponseMeta { status: 201, body }, timings)
                    .await?;
                metrics::histogram!("booking.confirm_ms")
                    .record(started.elapsed().as_millis() as f64);
                Ok(response)
            }
            Err(err) => {
                // Best-effort alternatives ride on the capacity error only.
                let err = if let CoreError::CapacityExceeded { available, .. } = err {
                    CoreError::CapacityExceeded {
                        available,
                        suggestions: self.suggest_alternatives(&request).await,
                    }
                } else {
                    err
                };
                let mut outcome = ValidationOutcome::ok();
                outcome.error("request", err.to_string());
                if let CoreError::CapacityExceeded { suggestions, .. } = &err {
                    outcome.suggestions = suggestions.clone();
                }
                self.record_failure(tenant_id, &key, err.code().http_status(), &outcome)
                    .await;
                Err(err)
            }
        }
    }

    /// Run the unit of work under the deadlock retry policy, refreshing
    /// version fences on mismatch.
    async fn drive_confirm_transaction(
        &self,
        request: &BookingRequest,
        booking_id: BookingId,
        plan: Vec<ReservationItem>,
    ) -> Result<Booking, CoreError> {
        let policy = BackoffPolicy::from_deadlock_config(
            self.config.deadlock.max_retries,
            self.config.deadlock.backoff_ms,
        );
        let plan = Arc::new(Mutex::new(plan));
        let tentative = self.config.tentative.enabled;

        let attempt = || {
            let plan = Arc::clone(&plan);
            async move {
                let now = self.clock.now();
                let (status, expires_at) = if tentative {
                    (
                        BookingStatus::Tentative,
                        Some(now + Duration::minutes(self.config.tentative.timeout_minutes)),
                    )
                } else {
                    (BookingStatus::Confirmed, None)
                };
                let booking = Booking {
                    id: booking_id,
                    tenant_id: request.tenant_id,
                    customer_id: request.customer_id,
                    service_id: request.service_id,
                    start_at: request.start_at,
                    end_at: request.end_at,
                    status,
                    total_minor: request.total_minor,
                    idempotency_key: request.idempotency_key.clone(),
                    expires_at,
                    created_at: now,
                    updated_at: now,
                };
                let event_type = if tentative {
                    event_types::BOOKING_TENTATIVE
                } else {
                    event_types::BOOKING_CREATED
                };
                let cmd = ConfirmCommand {
                    tenant_id: request.tenant_id,
                    items: plan.lock().clone(),
                    events: vec![NewOutboxEvent::for_booking(
                        event_type,
                        booking_id,
                        serde_json::json!({
                            "bookingId": booking_id,
                            "customerId": request.customer_id,
                            "serviceId": request.service_id,
                            "startAt": request.start_at,
                            "endAt": request.end_at,
                            "totalMinor": request.total_minor,
                        }),
                        Some(request.idempotency_key.clone()),
                    )],
                    change: BookingChange {
                        booking_id,
                        old_status: None,
                        new_status: status,
                        old_start_at: None,
                        new_start_at: request.start_at,
                        reason: None,
                        actor: "booking-coordinator".to_string(),
                        changed_at: now,
                    },
                    booking,
                };

                match self
                    .bookings
                    .execute_confirm(cmd)
                    .await
                    .map_err(AttemptError::Store)?
                {
                    ConfirmOutcome::Committed { booking, .. } => Ok(Ok(booking)),
                    ConfirmOutcome::ItemFailed { index, outcome } => match outcome {
                        ReserveOutcome::VersionMismatch {
                            current_version, ..
                        } => {
                            if let Some(item) = plan.lock().get_mut(index) {
                                item.expected_version = current_version;
                            }
                            Err(AttemptError::VersionRefresh)
                        }
                        other => Ok(Err(map_item_failure(&other))),
                    },
                }
            }
        };

        let result = retry_if(policy, attempt, |err: &AttemptError| match err {
            AttemptError::Store(e) => e.is_retryable(),
            AttemptError::VersionRefresh => true,
        })
        .await;

        match result {
            Ok(Ok(booking)) => Ok(booking),
            Ok(Err(domain_err)) => Err(domain_err),
            Err(AttemptError::Store(e)) => Err(CoreError::Store(e)),
            Err(AttemptError::VersionRefresh) => {
                // The retry budget ran out chasing a hot slot.
                Err(CoreError::CapacityExceeded {
                    available: 0,
                    suggestions: Vec::new(),
                })
            }
        }
    }

    /// Cancel a booking: policy evaluation, transactional release of every
    /// item, status transition, and the cancellation/refund events.
    ///
    /// # Errors
    ///
    /// Returns a [`CoreError`] when the booking is missing, the window has
    /// closed, or persistence fails.
    pub async fn cancel(&self, request: CancelRequest) -> Result<CancelResponse, CoreError> {
        let booking = self
            .bookings
            .get(request.tenant_id, request.booking_id)
            .await?
            .ok_or_else(|| CoreError::ResourceUnavailable {
                reason: "booking not found".to_string(),
            })?;

        if !booking.status.holds_capacity() {
            return Err(CoreError::Validation {
                details: vec![FieldError::new(
                    "bookingId",
                    format!("booking is already {}", booking.status.as_str()),
                )],
            });
        }

        let decision = reservo_policy::evaluate_cancellation(
            &booking,
            request.reason,
            self.clock.now(),
            &self.config.cancellation,
        );
        if !decision.allowed {
            return Err(CoreError::Validation {
                details: vec![FieldError::new(
                    "reason",
                    decision
                        .denied_reason
                        .unwrap_or_else(|| "cancellation not allowed".to_string()),
                )],
            });
        }

        let booking = self
            .drive_release_transition(
                &booking,
                BookingStatus::Cancelled,
                Some(request.reason.as_str().to_string()),
                request.actor,
                cancellation_events(&booking, request.reason, &decision),
            )
            .await?;

        if let Some(cache) = &self.cache {
            let items = self.bookings.items(booking.tenant_id, booking.id).await?;
            for item in items {
                cache
                    .invalidate_tag(&crate::availability::availability_tag(
                        booking.tenant_id,
                        item.resource_id,
                    ))
                    .await;
            }
        }

        Ok(CancelResponse {
            booking_id: booking.id,
            status: booking.status,
            penalty_minor: decision.penalty_minor,
            refund_minor: decision.refund_minor,
        })
    }

    /// Release a tentative booking whose payment failed (webhook path).
    /// Unlike [`Self::cancel`], no cancellation window applies: the hold
    /// simply never materialized.
    ///
    /// # Errors
    ///
    /// Returns a [`CoreError`] when the booking is missing or no longer
    /// tentative.
    pub async fn fail_payment(
        &self,
        tenant_id: TenantId,
        booking_id: BookingId,
    ) -> Result<Booking, CoreError> {
        let booking = self
            .bookings
            .get(tenant_id, booking_id)
            .await?
            .ok_or_else(|| CoreError::ResourceUnavailable {
                reason: "booking not found".to_string(),
            })?;
        if booking.status != BookingStatus::Tentative {
            return Err(CoreError::Validation {
                details: vec![FieldError::new(
                    "bookingId",
                    format!("booking is {}, not tentative", booking.status.as_str()),
                )],
            });
        }
        self.drive_release_transition(
            &booking,
            BookingStatus::Cancelled,
            Some(CancellationReason::PaymentFailed.as_str().to_string()),
            "payment-webhook".to_string(),
            vec![NewOutboxEvent::for_booking(
                event_types::BOOKING_CANCELLED,
                booking.id,
                serde_json::json!({
                    "bookingId": booking.id,
                    "customerId": booking.customer_id,
                    "reason": CancellationReason::PaymentFailed.as_str(),
                }),
                None,
            )],
        )
        .await
    }

    /// Transition a tentative booking to confirmed after payment was
    /// observed (webhook path). Capacity is already held; no items move.
    ///
    /// # Errors
    ///
    /// Returns a [`CoreError`] when the booking is missing or no longer
    /// tentative.
    pub async fn confirm_payment(
        &self,
        tenant_id: TenantId,
        booking_id: BookingId,
    ) -> Result<Booking, CoreError> {
        let now = self.clock.now();
        let customer_id = self
            .bookings
            .get(tenant_id, booking_id)
            .await?
            .map(|b| b.customer_id);
        let outcome = self
            .bookings
            .execute_transition(TransitionCommand {
                tenant_id,
                booking_id,
                expect_status: BookingStatus::Tentative,
                new_status: BookingStatus::Confirmed,
                release_items: Vec::new(),
                events: vec![NewOutboxEvent::for_booking(
                    event_types::BOOKING_CONFIRMED,
                    booking_id,
                    serde_json::json!({ "bookingId": booking_id, "customerId": customer_id }),
                    None,
                )],
                change: BookingChange {
                    booking_id,
                    old_status: Some(BookingStatus::Tentative),
                    new_status: BookingStatus::Confirmed,
                    old_start_at: None,
                    new_start_at: now,
                    reason: Some("payment confirmed".to_string()),
                    actor: "payment-webhook".to_string(),
                    changed_at: now,
                },
                clear_expiry: true,
            })
            .await?;

        match outcome {
            TransitionOutcome::Committed { booking } => Ok(booking),
            TransitionOutcome::StatusConflict { current } => Err(CoreError::Validation {
                details: vec![FieldError::new(
                    "bookingId",
                    format!("booking is {}, not tentative", current.as_str()),
                )],
            }),
            TransitionOutcome::ItemFailed { .. } => {
                Err(CoreError::Internal("payment confirmation released no items".to_string()))
            }
        }
    }

    /// Release all items of `booking` and move it to `new_status`,
    /// retrying stale version fences.
    async fn drive_release_transition(
        &self,
        booking: &Booking,
        new_status: BookingStatus,
        reason: Option<String>,
        actor: String,
        events: Vec<NewOutboxEvent>,
    ) -> Result<Booking, CoreError> {
        let items = self.bookings.items(booking.tenant_id, booking.id).await?;
        let mut release_items = Vec::with_capacity(items.len());
        for item in &items {
            let slot = self
                .inventory
                .timeslot(booking.tenant_id, item.timeslot_id)
                .await?
                .ok_or_else(|| CoreError::ResourceUnavailable {
                    reason: "timeslot vanished".to_string(),
                })?;
            release_items.push(ReservationItem {
                timeslot_id: item.timeslot_id,
                resource_id: item.resource_id,
                capacity: item.reserved_capacity,
                expected_version: slot.version,
            });
        }
        release_items.sort_by_key(|item| (item.resource_id, item.timeslot_id));

        let policy = BackoffPolicy::from_deadlock_config(
            self.config.deadlock.max_retries,
            self.config.deadlock.backoff_ms,
        );
        let release_items = Arc::new(Mutex::new(release_items));

        let attempt = || {
            let release_items = Arc::clone(&release_items);
            let reason = reason.clone();
            let actor = actor.clone();
            let events = events.clone();
            async move {
                let now = self.clock.now();
                let cmd = TransitionCommand {
                    tenant_id: booking.tenant_id,
                    booking_id: booking.id,
                    expect_status: booking.status,
                    new_status,
                    release_items: release_items.lock().clone(),
                    events,
                    change: BookingChange {
                        booking_id: booking.id,
                        old_status: Some(booking.status),
                        new_status,
                        old_start_at: Some(booking.start_at),
                        new_start_at: booking.start_at,
                        reason,
                        actor,
                        changed_at: now,
                    },
                    clear_expiry: false,
                };
                match self
                    .bookings
                    .execute_transition(cmd)
                    .await
                    .map_err(AttemptError::Store)?
                {
                    TransitionOutcome::Committed { booking } => Ok(Ok(booking)),
                    TransitionOutcome::StatusConflict { current } => {
                        Ok(Err(CoreError::Validation {
                            details: vec![FieldError::new(
                                "bookingId",
                                format!("booking is already {}", current.as_str()),
                            )],
                        }))
                    }
                    TransitionOutcome::ItemFailed { index, outcome } => match outcome {
                        ReserveOutcome::VersionMismatch {
                            current_version, ..
                        } => {
                            if let Some(item) = release_items.lock().get_mut(index) {
                                item.expected_version = current_version;
                            }
                            Err(AttemptError::VersionRefresh)
                        }
                        other => Ok(Err(map_item_failure(&other))),
                    },
                }
            }
        };

        let result = retry_if(policy, attempt, |err: &AttemptError| match err {
            AttemptError::Store(e) => e.is_retryable(),
            AttemptError::VersionRefresh => true,
        })
        .await;

        match result {
            Ok(Ok(booking)) => Ok(booking),
            Ok(Err(domain_err)) => Err(domain_err),
            Err(AttemptError::Store(e)) => Err(CoreError::Store(e)),
            Err(AttemptError::VersionRefresh) => {
                Err(CoreError::Internal("release kept losing version races".to_string()))
            }
        }
    }

    /// Best-effort forward scan for up to 5 alternatives over the next 7
    /// days at slot granularity.
    async fn suggest_alternatives(&self, request: &BookingRequest) -> Vec<Suggestion> {
        let Some(first) = request.items.first() else {
            return Vec::new();
        };
        let needed = first.capacity;
        let horizon = request.start_at + Duration::days(7);
        let slots = match self
            .inventory
            .available_slots(
                request.tenant_id,
                &[first.resource_id],
                request.start_at,
                horizon,
                Some(needed),
            )
            .await
        {
            Ok(slots) => slots,
            Err(err) => {
                tracing::debug!(error = %err, "alternative scan failed, omitting suggestions");
                return Vec::new();
            }
        };
        slots
            .into_iter()
            .take(5)
            .map(|slot| Suggestion {
                resource_id: slot.timeslot.resource_id,
                start_at: slot.timeslot.start_at,
                end_at: slot.timeslot.end_at,
                reason: "capacity available".to_string(),
            })
            .collect()
    }

    async fn record_failure(
        &self,
        tenant_id: TenantId,
        key: &str,
        status: u16,
        outcome: &ValidationOutcome,
    ) {
        let body = serde_json::to_value(outcome).unwrap_or(serde_json::Value::Null);
        if let Err(err) = self
            .idempotency
            .fail(
                tenant_id,
                key,
                Some(&ResponseMeta { status, body }),
                StageTimings::default(),
            )
            .await
        {
            tracing::warn!(key, error = %err, "failed to record idempotency failure");
        }
    }

    async fn invalidate_availability(&self, request: &BookingRequest) {
        if let Some(cache) = &self.cache {
            for item in &request.items {
                cache
                    .invalidate_tag(&crate::availability::availability_tag(
                        request.tenant_id,
                        item.resource_id,
                    ))
                    .await;
            }
        }
    }
}

fn map_item_failure(outcome: &ReserveOutcome) -> CoreError {
    match outcome {
        ReserveOutcome::CapacityExceeded { available } => CoreError::CapacityExceeded {
            available: *available,
            suggestions: Vec::new(),
        },
        ReserveOutcome::SlotNotFound => CoreError::ResourceUnavailable {
            reason: "timeslot not found".to_string(),
        },
        ReserveOutcome::ResourceNotFound => CoreError::ResourceUnavailable {
            reason: "resource not found".to_string(),
        },
        ReserveOutcome::BusinessRuleViolation { reason } => CoreError::ResourceUnavailable {
            reason: reason.clone(),
        },
        ReserveOutcome::Ok { .. } | ReserveOutcome::VersionMismatch { .. } => {
            CoreError::Internal("unexpected reserve outcome".to_string())
        }
    }
}

/// Outbox events emitted by a cancellation: the cancellation itself plus a
/// refund request when money moves back.
fn cancellation_events(
    booking: &Booking,
    reason: CancellationReason,
    decision: &CancellationDecision,
) -> Vec<NewOutboxEvent> {
    let mut events = vec![NewOutboxEvent::for_booking(
        event_types::BOOKING_CANCELLED,
        booking.id,
        serde_json::json!({
            "bookingId": booking.id,
            "customerId": booking.customer_id,
            "reason": reason.as_str(),
            "penaltyMinor": decision.penalty_minor,
            "refundMinor": decision.refund_minor,
        }),
        None,
    )];
    if decision.refund_minor > 0 {
        events.push(NewOutboxEvent::for_booking(
            event_types::PAYMENT_REFUND_REQUESTED,
            booking.id,
            serde_json::json!({
                "bookingId": booking.id,
                "customerId": booking.customer_id,
                "amountMinor": decision.refund_minor,
            }),
            None,
        ));
    }
    events
}
