//! Outbox relay.
//!
//! Claims batches of pending outbox rows, translates each into dispatch
//! rows (and refund-gateway calls where the event demands it), and marks
//! the row published, or returns it to pending with backoff, then
//! deadletter. Within one pass, events are grouped by
//! `hash(aggregate_id) % shards` and each group is processed in order, so
//! per-aggregate ordering survives concurrency.

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use reservo_core::clock::SharedClock;
use reservo_core::config::NotificationConfig;
use reservo_core::domain::notification::{Channel, NewDispatch, Priority};
use reservo_core::domain::outbox::{event_types, OutboxEvent};
use reservo_core::error::StoreError;
use reservo_core::ids::{CustomerId, TenantId};
use reservo_core::stores::{CatalogStore, DispatchStore, OutboxStore};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::watch;

/// Drains the outbox into dispatch rows.
pub struct OutboxRelay {
    outbox: Arc<dyn OutboxStore>,
    dispatches: Arc<dyn DispatchStore>,
    catalog: Arc<dyn CatalogStore>,
    clock: SharedClock,
    config: NotificationConfig,
    worker_name: String,
}

impl OutboxRelay {
    /// Wire up a relay worker.
    #[must_use]
    pub fn new(
        outbox: Arc<dyn OutboxStore>,
        dispatches: Arc<dyn DispatchStore>,
        catalog: Arc<dyn CatalogStore>,
        clock: SharedClock,
        config: NotificationConfig,
        worker_name: impl Into<String>,
    ) -> Self {
        Self {
            outbox,
            dispatches,
            catalog,
            clock,
            config,
            worker_name: worker_name.into(),
        }
    }

    /// One relay pass: claim, translate, mark. Returns how many events
    /// were published.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the claim itself fails; per-event
    /// failures are recorded on the row and retried later.
    pub async fn run_once(&self) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let batch = self
            .outbox
            .claim_batch(&self.worker_name, self.config.relay_batch_size, now)
            .await?;
        if batch.is_empty() {
            return Ok(0);
        }

        // Shard by aggregate so each aggregate's events stay ordered.
        let shards = self.config.relay_shards.max(1) as usize;
        let mut lanes: Vec<Vec<OutboxEvent>> = (0..shards).map(|_| Vec::new()).collect();
        for event in batch {
            let mut hasher = DefaultHasher::new();
            event.aggregate_id.hash(&mut hasher);
            lanes[(hasher.finish() as usize) % shards].push(event);
        }

        let published: u64 = join_all(lanes.into_iter().map(|lane| self.process_lane(lane)))
            .await
            .into_iter()
            .sum();
        Ok(published)
    }

    async fn process_lane(&self, lane: Vec<OutboxEvent>) -> u64 {
        let mut published = 0u64;
        for event in lane {
            match self.translate(&event).await {
                Ok(()) => {
                    let now = self.clock.now();
                    if let Err(err) = self.outbox.mark_published(event.id, now).await {
                        tracing::error!(outbox_id = %event.id, error = %err, "mark published failed");
                    } else {
                        published += 1;
                    }
                }
                Err(err) => {
                    self.record_failure(&event, &err.to_string()).await;
                }
            }
        }
        published
    }

    async fn record_failure(&self, event: &OutboxEvent, error: &str) {
        let attempts = event.attempts + 1;
        let deadletter = attempts >= self.config.relay_max_attempts;
        let next_attempt_at = self.backoff_from(attempts);
        tracing::warn!(
            outbox_id = %event.id,
            event_type = %event.event_type,
            attempts,
            deadletter,
            error,
            "outbox event delivery failed"
        );
        if let Err(err) = self
            .outbox
            .mark_failed(event.id, error, next_attempt_at, deadletter)
            .await
        {
            tracing::error!(outbox_id = %event.id, error = %err, "mark failed failed");
        }
    }

    fn backoff_from(&self, attempts: i32) -> DateTime<Utc> {
        let exponent = u32::try_from(attempts.max(1) - 1).unwrap_or(0).min(10);
        let millis = 1000i64.saturating_mul(2i64.pow(exponent));
        let capped = millis.min(self.config.max_backoff.as_millis() as i64);
        self.clock.now() + Duration::milliseconds(capped)
    }

    /// Turn one outbox event into its dispatch rows. Idempotent: the
    /// dispatch store ignores duplicates of the
    /// `(outbox_event_id, channel, recipient)` key.
    async fn translate(&self, event: &OutboxEvent) -> Result<(), StoreError> {
        let Some(customer_id) = event
            .payload
            .get("customerId")
            .and_then(|v| serde_json::from_value::<CustomerId>(v.clone()).ok())
        else {
            // Not a customer-facing event (refund requests, notification
            // failure flags): nothing to dispatch.
            tracing::debug!(event_type = %event.event_type, "event carries no recipient, skipping");
            return Ok(());
        };

        let dispatches = self
            .plan_dispatches(event, event.tenant_id, customer_id)
            .await?;
        if dispatches.is_empty() {
            return Ok(());
        }
        let inserted = self.dispatches.insert_many(&dispatches).await?;
        metrics::counter!("relay.dispatches_created").increment(inserted);
        tracing::debug!(
            outbox_id = %event.id,
            planned = dispatches.len(),
            inserted,
            "outbox event translated"
        );
        Ok(())
    }

    async fn plan_dispatches(
        &self,
        event: &OutboxEvent,
        tenant_id: TenantId,
        customer_id: CustomerId,
    ) -> Result<Vec<NewDispatch>, StoreError> {
        let customer = self.catalog.customer(tenant_id, customer_id).await?;
        let Some(customer) = customer else {
            tracing::warn!(customer = %customer_id, "dispatch recipient unknown, skipping");
            return Ok(Vec::new());
        };
        let preferences = self.catalog.preferences(tenant_id, customer_id).await?;

        let template_type = event.event_type.to_lowercase();
        let priority = match event.event_type.as_str() {
            event_types::BOOKING_CANCELLED => Priority::High,
            event_types::BOOKING_CREATED | event_types::BOOKING_CONFIRMED => Priority::Normal,
            _ => Priority::Low,
        };

        let mut out = Vec::new();
        for channel in Channel::ALL {
            let recipient = match channel {
                Channel::Email => customer.email.clone(),
                Channel::Sms => customer.phone.clone(),
                // Push/LINE/webhook endpoints come from channel-specific
                // registrations this engine does not manage.
                Channel::Push | Channel::Line | Channel::Webhook => None,
            };
            let Some(recipient) = recipient else { continue };
            if !preferences.accepts(channel, &template_type) {
                continue;
            }
            out.push(NewDispatch {
                outbox_event_id: Some(event.id),
                tenant_id,
                channel,
                recipient,
                recipient_id: customer_id.to_string(),
                template_type: template_type.clone(),
                variables: event.payload.clone(),
                priority,
                expires_at: None,
            });
        }
        Ok(out)
    }

    /// Poll loop: drain until `shutdown` flips, releasing stale claims of
    /// crashed workers on each idle pass.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let poll = std::time::Duration::from_millis(self.config.relay_poll_interval_ms.max(10));
        let mut tick = tokio::time::interval(poll);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.run_once().await {
                        Ok(0) => {
                            let stale_before = self.clock.now() - Duration::minutes(5);
                            if let Err(err) = self.outbox.release_stale_claims(stale_before).await {
                                tracing::warn!(error = %err, "stale claim release failed");
                            }
                        }
                        Ok(_) => {}
                        Err(err) => tracing::error!(error = %err, "relay pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!(worker = %self.worker_name, "relay draining");
                        return;
                    }
                }
            }
        }
    }
}
