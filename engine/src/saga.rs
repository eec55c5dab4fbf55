//! Saga coordinator with compensation.
//!
//! A saga is an ordered list of steps, each with an `execute` and a
//! `compensate`. Progress is persisted at every boundary; when step *k*
//! fails, steps *k-1..0* are compensated in reverse, best-effort. A
//! participant record per step feeds the stuck-transaction reconciliation.

use async_trait::async_trait;
use reservo_core::clock::SharedClock;
use reservo_core::domain::inventory::{CapacityMutation, MutationKind, ReserveOutcome};
use reservo_core::domain::saga::{
    ParticipantStatus, SagaExecution, SagaStatus, TransactionParticipant,
};
use reservo_core::error::StoreError;
use reservo_core::ids::{BookingId, SagaId, TenantId, TransactionId};
use reservo_core::stores::booking::ReservationItem;
use reservo_core::stores::{InventoryStore, SagaStore};
use std::sync::Arc;

use crate::payment::PaymentGateway;

/// Shared context handed to every step.
#[derive(Debug, Clone)]
pub struct SagaContext {
    /// Saga id.
    pub saga_id: SagaId,
    /// Distributed transaction id, shared by all participants.
    pub transaction_id: TransactionId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Input payload.
    pub payload: serde_json::Value,
}

/// One locally transactional step with its compensation.
#[async_trait]
pub trait SagaStep: Send + Sync {
    /// Step name, recorded in the execution and participant rows.
    fn name(&self) -> &'static str;

    /// Run the step.
    ///
    /// # Errors
    ///
    /// Returns a message describing the failure; the coordinator then
    /// compensates prior steps.
    async fn execute(&self, ctx: &SagaContext) -> Result<serde_json::Value, String>;

    /// Undo the step, given the result its `execute` produced.
    ///
    /// # Errors
    ///
    /// Returns a message when compensation fails; the coordinator logs it
    /// and continues with the remaining compensations.
    async fn compensate(&self, ctx: &SagaContext, result: &serde_json::Value)
        -> Result<(), String>;
}

/// Final outcome of one saga run.
#[derive(Debug)]
pub enum SagaRunOutcome {
    /// Every step completed.
    Completed {
        /// Per-step results, in execution order.
        results: Vec<serde_json::Value>,
    },
    /// A step failed and every prior step was compensated.
    Compensated {
        /// The failing step's name.
        failed_step: String,
        /// The failure message.
        error: String,
    },
    /// A step failed and at least one compensation failed permanently.
    Failed {
        /// The failing step's name.
        failed_step: String,
        /// The original failure message.
        error: String,
        /// Steps whose compensation failed.
        uncompensated: Vec<String>,
    },
}

/// Drives sagas against a persisted execution record.
pub struct SagaCoordinator {
    store: Arc<dyn SagaStore>,
    clock: SharedClock,
    /// How long a participant may stay unsettled before reconciliation
    /// surfaces it.
    participant_ttl: chrono::Duration,
}

impl SagaCoordinator {
    /// Wire up the coordinator.
    #[must_use]
    pub fn new(store: Arc<dyn SagaStore>, clock: SharedClock) -> Self {
        Self {
            store,
            clock,
            participant_ttl: chrono::Duration::minutes(15),
        }
    }

    async fn persist_participant(
        &self,
        ctx: &SagaContext,
        step: &str,
        status: ParticipantStatus,
        compensation_data: Option<serde_json::Value>,
        compensation_completed: bool,
    ) {
        let now = self.clock.now();
        let participant = TransactionParticipant {
            transaction_id: ctx.transaction_id,
            saga_id: Some(ctx.saga_id),
            tenant_id: ctx.tenant_id,
            participant: step.to_string(),
            status,
            compensation_data,
            compensation_completed,
            expires_at: now + self.participant_ttl,
            updated_at: now,
        };
        if let Err(err) = self.store.upsert_participant(&participant).await {
            tracing::warn!(saga = %ctx.saga_id, step, error = %err, "participant upsert failed");
        }
    }

    /// Run `steps` in order under a fresh execution record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] only when the execution record itself cannot
    /// be persisted; step failures surface through [`SagaRunOutcome`].
    pub async fn run(
        &self,
        tenant_id: TenantId,
        name: &str,
        steps: &[Arc<dyn SagaStep>],
        payload: serde_json::Value,
    ) -> Result<SagaRunOutcome, StoreError> {
        let now = self.clock.now();
        let ctx = SagaContext {
            saga_id: SagaId::new(),
            transaction_id: TransactionId::new(),
            tenant_id,
            payload,
        };
        let mut execution = SagaExecution {
            saga_id: ctx.saga_id,
            tenant_id,
            name: name.to_string(),
            status: SagaStatus::Executing,
            steps: steps.iter().map(|s| s.name().to_string()).collect(),
            completed_steps: Vec::new(),
            results: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.store.insert(&execution).await?;

        for (index, step) in steps.iter().enumerate() {
            self.persist_participant(&ctx, step.name(), ParticipantStatus::Preparing, None, false)
                .await;

            match step.execute(&ctx).await {
                Ok(result) => {
                    execution.completed_steps.push(step.name().to_string());
                    execution.results.push(result.clone());
                    execution.updated_at = self.clock.now();
                    self.store.update(&execution).await?;
                    self.persist_participant(
                        &ctx,
                        step.name(),
                        ParticipantStatus::Committed,
                        Some(result),
                        false,
                    )
                    .await;
                }
                Err(error) => {
                    tracing::warn!(
                        saga = %ctx.saga_id,
                        step = step.name(),
                        error,
                        "saga step failed, compensating"
                    );
                    metrics::counter!("saga.step_failed", "step" => step.name()).increment(1);
                    self.persist_participant(
                        &ctx,
                        step.name(),
                        ParticipantStatus::Aborted,
                        None,
                        false,
                    )
                    .await;

                    let uncompensated =
                        self.compensate_completed(&ctx, &steps[..index], &execution).await;

                    execution.status = if uncompensated.is_empty() {
                        SagaStatus::Compensated
                    } else {
                        SagaStatus::Failed
                    };
                    execution.updated_at = self.clock.now();
                    self.store.update(&execution).await?;

                    return Ok(if uncompensated.is_empty() {
                        SagaRunOutcome::Compensated {
                            failed_step: step.name().to_string(),
                            error,
                        }
                    } else {
                        SagaRunOutcome::Failed {
                            failed_step: step.name().to_string(),
                            error,
                            uncompensated,
                        }
                    });
                }
            }
        }

        execution.status = SagaStatus::Completed;
        execution.updated_at = self.clock.now();
        self.store.update(&execution).await?;
        Ok(SagaRunOutcome::Completed {
            results: execution.results,
        })
    }

    /// Compensate completed steps in reverse order; returns the names of
    /// steps whose compensation failed.
    async fn compensate_completed(
        &self,
        ctx: &SagaContext,
        completed: &[Arc<dyn SagaStep>],
        execution: &SagaExecution,
    ) -> Vec<String> {
        let mut uncompensated = Vec::new();
        for (index, step) in completed.iter().enumerate().rev() {
            let result = execution
                .results
                .get(index)
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            self.persist_participant(
                ctx,
                step.name(),
                ParticipantStatus::Compensating,
                Some(result.clone()),
                false,
            )
            .await;
            match step.compensate(ctx, &result).await {
                Ok(()) => {
                    self.persist_participant(
                        ctx,
                        step.name(),
                        ParticipantStatus::Compensated,
                        Some(result),
                        true,
                    )
                    .await;
                }
                Err(error) => {
                    tracing::error!(
                        saga = %ctx.saga_id,
                        step = step.name(),
                        error,
                        "compensation failed"
                    );
                    metrics::counter!("saga.compensation_failed", "step" => step.name())
                        .increment(1);
                    self.persist_participant(
                        ctx,
                        step.name(),
                        ParticipantStatus::Failed,
                        Some(result),
                        false,
                    )
                    .await;
                    uncompensated.push(step.name().to_string());
                }
            }
        }
        uncompensated
    }

    /// Participants of transactions stuck past their expiry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    pub async fn find_stuck(
        &self,
        limit: usize,
    ) -> Result<Vec<TransactionParticipant>, StoreError> {
        self.store.find_stuck(self.clock.now(), limit).await
    }
}

/// Step: reserve capacity for a set of items via the inventory store.
///
/// Compensation releases the same items using the version fences returned
/// by the reservation.
pub struct ReserveCapacityStep {
    inventory: Arc<dyn InventoryStore>,
    items: Vec<ReservationItem>,
}

impl ReserveCapacityStep {
    /// Build the step.
    #[must_use]
    pub fn new(inventory: Arc<dyn InventoryStore>, items: Vec<ReservationItem>) -> Self {
        Self { inventory, items }
    }
}

#[async_trait]
impl SagaStep for ReserveCapacityStep {
    fn name(&self) -> &'static str {
        "reserve-capacity"
    }

    async fn execute(&self, ctx: &SagaContext) -> Result<serde_json::Value, String> {
        let mutations: Vec<CapacityMutation> = self
            .items
            .iter()
            .map(|item| CapacityMutation {
                timeslot_id: item.timeslot_id,
                resource_id: item.resource_id,
                kind: MutationKind::Reserve(item.capacity),
                expected_version: item.expected_version,
            })
            .collect();
        let results = self
            .inventory
            .bulk_mutate(ctx.tenant_id, mutations)
            .await
            .map_err(|e| e.to_string())?;

        if let Some(failed) = results.iter().find(|r| !r.outcome.is_ok()) {
            return Err(format!("reserve failed on {}: {:?}", failed.timeslot_id, failed.outcome));
        }

        let fences: Vec<serde_json::Value> = results
            .iter()
            .map(|r| match r.outcome {
                ReserveOutcome::Ok { new_version, .. } => serde_json::json!({
                    "timeslotId": r.timeslot_id,
                    "version": new_version,
                }),
                _ => serde_json::Value::Null,
            })
            .collect();
        Ok(serde_json::Value::Array(fences))
    }

    async fn compensate(
        &self,
        ctx: &SagaContext,
        result: &serde_json::Value,
    ) -> Result<(), String> {
        let fences = result.as_array().cloned().unwrap_or_default();
        let mutations: Vec<CapacityMutation> = self
            .items
            .iter()
            .zip(fences)
            .filter_map(|(item, fence)| {
                let version = fence.get("version").and_then(serde_json::Value::as_i64)?;
                Some(CapacityMutation {
                    timeslot_id: item.timeslot_id,
                    resource_id: item.resource_id,
                    kind: MutationKind::Release(item.capacity),
                    expected_version: version,
                })
            })
            .collect();
        let results = self
            .inventory
            .bulk_mutate(ctx.tenant_id, mutations)
            .await
            .map_err(|e| e.to_string())?;
        if let Some(failed) = results.iter().find(|r| !r.outcome.is_ok()) {
            return Err(format!("release failed on {}: {:?}", failed.timeslot_id, failed.outcome));
        }
        Ok(())
    }
}

/// Step: authorize payment for a booking through the PSP port.
///
/// Compensation refunds (voids) the authorization.
pub struct AuthorizePaymentStep {
    gateway: Arc<dyn PaymentGateway>,
    booking_id: BookingId,
    amount_minor: i64,
}

impl AuthorizePaymentStep {
    /// Build the step.
    #[must_use]
    pub const fn new(
        gateway: Arc<dyn PaymentGateway>,
        booking_id: BookingId,
        amount_minor: i64,
    ) -> Self {
        Self {
            gateway,
            booking_id,
            amount_minor,
        }
    }
}

#[async_trait]
impl SagaStep for AuthorizePaymentStep {
    fn name(&self) -> &'static str {
        "authorize-payment"
    }

    async fn execute(&self, ctx: &SagaContext) -> Result<serde_json::Value, String> {
        let intent = self
            .gateway
            .authorize(ctx.tenant_id, self.booking_id, self.amount_minor)
            .await
            .map_err(|e| e.to_string())?;
        serde_json::to_value(&intent).map_err(|e| e.to_string())
    }

    async fn compensate(
        &self,
        ctx: &SagaContext,
        result: &serde_json::Value,
    ) -> Result<(), String> {
        let intent_id = result
            .get("intentId")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| "authorization result carries no intent id".to_string())?;
        self.gateway
            .refund(ctx.tenant_id, intent_id, self.amount_minor)
            .await
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)] // Test code can use unwrap
mod tests {
    use super::*;
    use crate::payment::{PaymentIntent, ProviderFault};
    use chrono::TimeZone;
    use reservo_core::domain::catalog::{Resource, ResourceStatus};
    use reservo_core::domain::inventory::ResourceKind;
    use reservo_core::ids::ResourceId;
    use reservo_testing::{InMemoryStores, TestClock};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingStep {
        step_name: &'static str,
        fail: bool,
        executions: AtomicUsize,
        compensations: AtomicUsize,
    }

    impl RecordingStep {
        fn new(step_name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                step_name,
                fail,
                executions: AtomicUsize::new(0),
                compensations: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SagaStep for RecordingStep {
        fn name(&self) -> &'static str {
            self.step_name
        }

        async fn execute(&self, _ctx: &SagaContext) -> Result<serde_json::Value, String> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(format!("{} exploded", self.step_name))
            } else {
                Ok(serde_json::json!({ "step": self.step_name }))
            }
        }

        async fn compensate(
            &self,
            _ctx: &SagaContext,
            _result: &serde_json::Value,
        ) -> Result<(), String> {
            self.compensations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct DecliningGateway;

    #[async_trait]
    impl PaymentGateway for DecliningGateway {
        async fn authorize(
            &self,
            _tenant_id: TenantId,
            _booking_id: BookingId,
            _amount_minor: i64,
        ) -> Result<PaymentIntent, ProviderFault> {
            Err(ProviderFault::permanent("card declined"))
        }

        async fn capture(&self, _: TenantId, _: &str) -> Result<(), ProviderFault> {
            Ok(())
        }

        async fn refund(&self, _: TenantId, _: &str, _: i64) -> Result<(), ProviderFault> {
            Ok(())
        }
    }

    fn coordinator(stores: &InMemoryStores) -> SagaCoordinator {
        SagaCoordinator::new(Arc::new(stores.clone()), Arc::new(TestClock::fixed()))
    }

    #[tokio::test]
    async fn all_steps_complete_in_order() {
        let stores = InMemoryStores::new();
        let saga = coordinator(&stores);
        let a = RecordingStep::new("a", false);
        let b = RecordingStep::new("b", false);
        let steps: Vec<Arc<dyn SagaStep>> = vec![a.clone(), b.clone()];

        let outcome = saga
            .run(TenantId::new(), "test", &steps, serde_json::json!({}))
            .await
            .unwrap();
        match outcome {
            SagaRunOutcome::Completed { results } => assert_eq!(results.len(), 2),
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(a.executions.load(Ordering::SeqCst), 1);
        assert_eq!(b.executions.load(Ordering::SeqCst), 1);
        assert_eq!(a.compensations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failure_compensates_prior_steps_in_reverse() {
        let stores = InMemoryStores::new();
        let saga = coordinator(&stores);
        let a = RecordingStep::new("a", false);
        let b = RecordingStep::new("b", false);
        let c = RecordingStep::new("c", true);
        let steps: Vec<Arc<dyn SagaStep>> = vec![a.clone(), b.clone(), c.clone()];

        let outcome = saga
            .run(TenantId::new(), "test", &steps, serde_json::json!({}))
            .await
            .unwrap();
        match outcome {
            SagaRunOutcome::Compensated { failed_step, .. } => assert_eq!(failed_step, "c"),
            other => panic!("expected compensation, got {other:?}"),
        }
        assert_eq!(a.compensations.load(Ordering::SeqCst), 1);
        assert_eq!(b.compensations.load(Ordering::SeqCst), 1);
        assert_eq!(c.compensations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn declined_payment_releases_reserved_capacity() {
        let stores = InMemoryStores::new();
        let tenant = TenantId::new();
        let resource = ResourceId::new();
        stores.add_resource(Resource {
            id: resource,
            tenant_id: tenant,
            kind: ResourceKind::Room,
            total_capacity: 2,
            status: ResourceStatus::Active,
        });
        let start = chrono::Utc.with_ymd_and_hms(2025, 3, 10, 10, 0, 0).unwrap();
        let slot = stores.add_timeslot(tenant, resource, start, start + chrono::Duration::hours(1), 2);

        let saga = coordinator(&stores);
        let reserve = Arc::new(ReserveCapacityStep::new(
            Arc::new(stores.clone()),
            vec![ReservationItem {
                timeslot_id: slot.id,
                resource_id: resource,
                capacity: 1,
                expected_version: 1,
            }],
        ));
        let pay = Arc::new(AuthorizePaymentStep::new(
            Arc::new(DecliningGateway),
            BookingId::new(),
            10_000,
        ));
        let steps: Vec<Arc<dyn SagaStep>> = vec![reserve, pay];

        let outcome = saga
            .run(tenant, "booking-confirm", &steps, serde_json::json!({}))
            .await
            .unwrap();
        assert!(matches!(outcome, SagaRunOutcome::Compensated { .. }));

        // Capacity came back through the version-fenced release.
        let slot_after = stores.timeslot(slot.id).unwrap();
        assert_eq!(slot_after.available_capacity, 2);
        assert_eq!(slot_after.version, 3); // reserve + release
    }
}

