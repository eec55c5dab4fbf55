//! Notification dispatcher.
//!
//! Claims due dispatch rows and delivers them over per-channel lanes.
//! Each lane is bounded by a semaphore (concurrency cap), throttled by a
//! token bucket (rate limit), and guarded by a circuit breaker around the
//! provider. The dispatch row is the source of truth; the in-memory lane
//! is only a hint, so a crash loses nothing.

use crate::provider::{NotificationProvider, OutboundMessage};
use crate::template;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use reservo_core::clock::SharedClock;
use reservo_core::config::NotificationConfig;
use reservo_core::domain::notification::{
    Channel, DispatchStatus, NotificationDispatch, ProviderResponse, QuietHours,
};
use reservo_core::domain::outbox::{event_types, NewOutboxEvent};
use reservo_core::error::StoreError;
use reservo_core::ids::CustomerId;
use reservo_core::stores::{CatalogStore, DispatchStore, OutboxStore};
use reservo_runtime::breaker::{Breaker, BreakerConfig, BreakerError};
use reservo_runtime::rate_limit::{TokenBucket, TokenBucketConfig};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::time::timeout;

/// What happened to one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Provider accepted; the row is `sent`.
    Sent,
    /// Provider confirmed synchronously; the row is `sent` and will flip
    /// to `delivered` on the callback.
    Delivered,
    /// Requeued with a delay (rate limit, quiet hours, transient failure).
    Requeued {
        /// When the next attempt is due.
        next_attempt_at: DateTime<Utc>,
    },
    /// Permanently failed.
    Failed,
    /// Suppressed by recipient preferences; the row is `cancelled`.
    Suppressed,
}

struct Lane {
    semaphore: Arc<Semaphore>,
    bucket: TokenBucket,
    breaker: Breaker,
    provider: Arc<dyn NotificationProvider>,
}

/// Delivers dispatch rows through channel providers.
pub struct Dispatcher {
    store: Arc<dyn DispatchStore>,
    catalog: Arc<dyn CatalogStore>,
    outbox: Arc<dyn OutboxStore>,
    clock: SharedClock,
    config: NotificationConfig,
    lanes: HashMap<Channel, Lane>,
}

impl Dispatcher {
    /// Wire up the dispatcher with one provider per channel. Channels
    /// without a provider are skipped at claim time.
    #[must_use]
    pub fn new(
        store: Arc<dyn DispatchStore>,
        catalog: Arc<dyn CatalogStore>,
        outbox: Arc<dyn OutboxStore>,
        clock: SharedClock,
        config: NotificationConfig,
        providers: HashMap<Channel, Arc<dyn NotificationProvider>>,
    ) -> Self {
        let lanes = providers
            .into_iter()
            .map(|(channel, provider)| {
                let channel_config = config.channel(channel);
                let lane = Lane {
                    semaphore: Arc::new(Semaphore::new(channel_config.max_concurrent.max(1))),
                    bucket: TokenBucket::new(TokenBucketConfig::per_minute(
                        channel_config.rate_limit_per_minute.max(1),
                    )),
                    breaker: Breaker::new(channel.as_str(), BreakerConfig::default()),
                    provider,
                };
                (channel, lane)
            })
            .collect();
        Self {
            store,
            catalog,
            outbox,
            clock,
            config,
            lanes,
        }
    }

    /// One dispatcher pass: claim due rows and deliver them. Jobs on the
    /// same channel respect the lane's concurrency cap; different channels
    /// run concurrently. Returns the per-job outcomes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when claiming fails; per-job failures are
    /// recorded on their rows.
    pub async fn pump(&self) -> Result<Vec<JobOutcome>, StoreError> {
        let now = self.clock.now();
        self.store.expire_overdue(now).await?;
        let claimed = self.store.claim_due(self.config.relay_batch_size, now).await?;
        if claimed.is_empty() {
            return Ok(Vec::new());
        }

        let jobs = claimed.into_iter().map(|dispatch| self.deliver(dispatch));
        Ok(futures::future::join_all(jobs).await)
    }

    /// Deliver one claimed dispatch row end to end.
    async fn deliver(&self, dispatch: NotificationDispatch) -> JobOutcome {
        let Some(lane) = self.lanes.get(&dispatch.channel) else {
            // No provider configured: hand the row back untouched.
            let next = self.clock.now() + ChronoDuration::minutes(1);
            return self.requeue(&dispatch, "no provider configured", next).await;
        };

        let permit = match lane.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return JobOutcome::Failed, // semaphore closed on shutdown
        };

        // Preferences and quiet hours before spending a provider call.
        match self.preference_gate(&dispatch).await {
            PreferenceGate::Proceed => {}
            PreferenceGate::Suppress => {
                drop(permit);
                return self.cancel(&dispatch).await;
            }
            PreferenceGate::Defer(until) => {
                drop(permit);
                return self.requeue(&dispatch, "quiet hours", until).await;
            }
        }

        // Rate limit: requeue with the computed delay instead of blocking
        // the lane.
        if let Err(wait) = lane.bucket.try_acquire() {
            drop(permit);
            let until = self.clock.now()
                + ChronoDuration::from_std(wait).unwrap_or_else(|_| ChronoDuration::seconds(60));
            return self.requeue(&dispatch, "rate limited", until).await;
        }

        let message = self.render(&dispatch).await;
        let verdict = lane
            .breaker
            .call(|| async {
                timeout(self.config.provider_timeout, lane.provider.send(&message))
                    .await
                    .map_err(|_| "provider call timed out".to_string())
            })
            .await;
        drop(permit);

        let response = match verdict {
            Ok(response) => response,
            Err(BreakerError::Open) => ProviderResponse::Retryable {
                error: "circuit open".to_string(),
            },
            Err(BreakerError::Inner(timeout_err)) => ProviderResponse::Retryable {
                error: timeout_err,
            },
        };

        self.settle(&dispatch, response).await
    }

    async fn settle(
        &self,
        dispatch: &NotificationDispatch,
        response: ProviderResponse,
    ) -> JobOutcome {
        let now = self.clock.now();
        match response {
            ProviderResponse::Delivered { external_id } => {
                self.mark(dispatch, DispatchStatus::Sent, external_id.as_deref(), None, None, true)
                    .await;
                metrics::counter!("dispatch.sent", "channel" => dispatch.channel.as_str())
                    .increment(1);
                JobOutcome::Delivered
            }
            ProviderResponse::Accepted { external_id } => {
                self.mark(dispatch, DispatchStatus::Sent, external_id.as_deref(), None, None, true)
                    .await;
                JobOutcome::Sent
            }
            ProviderResponse::Retryable { error } => {
                let channel_config = self.config.channel(dispatch.channel);
                if dispatch.attempts + 1 >= channel_config.max_retries {
                    self.fail_permanently(dispatch, &error).await
                } else {
                    let next = now + self.retry_backoff(dispatch.attempts + 1, &channel_config);
                    self.mark(
                        dispatch,
                        DispatchStatus::Pending,
                        None,
                        Some(&error),
                        Some(next),
                        true,
                    )
                    .await;
                    JobOutcome::Requeued {
                        next_attempt_at: next,
                    }
                }
            }
            ProviderResponse::Permanent { error } => self.fail_permanently(dispatch, &error).await,
        }
    }

    async fn fail_permanently(
        &self,
        dispatch: &NotificationDispatch,
        error: &str,
    ) -> JobOutcome {
        self.mark(dispatch, DispatchStatus::Failed, None, Some(error), None, true)
            .await;
        metrics::counter!("dispatch.failed", "channel" => dispatch.channel.as_str()).increment(1);
        tracing::warn!(
            dispatch_id = %dispatch.id,
            channel = dispatch.channel.as_str(),
            error,
            "dispatch permanently failed"
        );

        let channel_config = self.config.channel(dispatch.channel);
        if channel_config.flag_booking_on_permanent_failure {
            let event = NewOutboxEvent {
                event_type: event_types::NOTIFICATION_FAILED.to_string(),
                aggregate_type: "dispatch".to_string(),
                aggregate_id: dispatch.id.to_string(),
                payload: serde_json::json!({
                    "dispatchId": dispatch.id,
                    "channel": dispatch.channel.as_str(),
                    "templateType": dispatch.template_type,
                    "error": error,
                }),
                trace_id: None,
                correlation_id: None,
            };
            if let Err(err) = self.outbox.append(dispatch.tenant_id, event).await {
                tracing::error!(error = %err, "failed to flag permanent notification failure");
            }
        }
        JobOutcome::Failed
    }

    /// Backoff with jitter, capped by the channel and global maxima.
    fn retry_backoff(
        &self,
        attempt: i32,
        channel_config: &reservo_core::config::ChannelConfig,
    ) -> ChronoDuration {
        let exponent = u32::try_from(attempt.max(1) - 1).unwrap_or(0).min(10);
        let base_ms = i64::try_from(channel_config.backoff_ms).unwrap_or(1000);
        let raw = base_ms.saturating_mul(2i64.pow(exponent));
        let capped = raw.min(self.config.max_backoff.as_millis() as i64);
        let jitter = rand::thread_rng().gen_range(0..=capped / 10 + 1);
        ChronoDuration::milliseconds(capped + jitter)
    }

    async fn render(&self, dispatch: &NotificationDispatch) -> OutboundMessage {
        let language = self
            .recipient_language(dispatch)
            .await
            .unwrap_or_else(|| "default".to_string());
        let rendered = match self
            .catalog
            .template(dispatch.tenant_id, &dispatch.template_type, &language)
            .await
        {
            Ok(Some(template)) => template::render(&template, &dispatch.variables),
            Ok(None) => template::fallback(&dispatch.template_type, &dispatch.variables),
            Err(err) => {
                tracing::warn!(error = %err, "template lookup failed, using fallback");
                template::fallback(&dispatch.template_type, &dispatch.variables)
            }
        };
        OutboundMessage {
            channel: dispatch.channel,
            recipient: dispatch.recipient.clone(),
            subject: rendered.subject,
            body: rendered.body,
        }
    }

    async fn recipient_language(&self, dispatch: &NotificationDispatch) -> Option<String> {
        let customer_id: CustomerId = dispatch.recipient_id.parse::<uuid::Uuid>().ok()?.into();
        self.catalog
            .customer(dispatch.tenant_id, customer_id)
            .await
            .ok()
            .flatten()
            .and_then(|c| c.language)
    }

    async fn preference_gate(&self, dispatch: &NotificationDispatch) -> PreferenceGate {
        let Some(customer_id) = dispatch
            .recipient_id
            .parse::<uuid::Uuid>()
            .ok()
            .map(CustomerId::from)
        else {
            return PreferenceGate::Proceed;
        };
        let preferences = match self
            .catalog
            .preferences(dispatch.tenant_id, customer_id)
            .await
        {
            Ok(preferences) => preferences,
            Err(err) => {
                tracing::warn!(error = %err, "preference lookup failed, proceeding");
                return PreferenceGate::Proceed;
            }
        };

        if !preferences.accepts(dispatch.channel, &dispatch.template_type) {
            return PreferenceGate::Suppress;
        }
        if let Some(quiet) = preferences.quiet_hours {
            if let Some(until) = quiet_hours_end(&quiet, self.clock.now()) {
                return PreferenceGate::Defer(until);
            }
        }
        PreferenceGate::Proceed
    }

    async fn requeue(
        &self,
        dispatch: &NotificationDispatch,
        why: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> JobOutcome {
        // Back to pending without consuming a retry attempt.
        self.mark(
            dispatch,
            DispatchStatus::Pending,
            None,
            Some(why),
            Some(next_attempt_at),
            false,
        )
        .await;
        JobOutcome::Requeued { next_attempt_at }
    }

    async fn cancel(&self, dispatch: &NotificationDispatch) -> JobOutcome {
        // A claimed row is `sending`; fold it back to pending first so the
        // status machine permits the cancellation.
        self.mark(dispatch, DispatchStatus::Pending, None, None, None, false)
            .await;
        self.mark(
            dispatch,
            DispatchStatus::Cancelled,
            None,
            Some("suppressed by recipient preferences"),
            None,
            false,
        )
        .await;
        JobOutcome::Suppressed
    }

    async fn mark(
        &self,
        dispatch: &NotificationDispatch,
        status: DispatchStatus,
        external_id: Option<&str>,
        error: Option<&str>,
        next_attempt_at: Option<DateTime<Utc>>,
        bump_attempts: bool,
    ) {
        match self
            .store
            .mark(
                dispatch.id,
                status,
                external_id,
                error,
                next_attempt_at,
                bump_attempts,
                self.clock.now(),
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(
                    dispatch_id = %dispatch.id,
                    to = status.as_str(),
                    "dispatch transition refused"
                );
            }
            Err(err) => {
                tracing::error!(dispatch_id = %dispatch.id, error = %err, "dispatch mark failed");
            }
        }
    }

    /// Poll loop until `shutdown` flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let poll = std::time::Duration::from_millis(self.config.relay_poll_interval_ms.max(10));
        let mut tick = tokio::time::interval(poll);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(err) = self.pump().await {
                        tracing::error!(error = %err, "dispatcher pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("dispatcher draining");
                        return;
                    }
                }
            }
        }
    }
}

enum PreferenceGate {
    Proceed,
    Suppress,
    Defer(DateTime<Utc>),
}

/// When `now` falls inside the recipient's quiet hours, the instant the
/// window ends (UTC); otherwise `None`.
fn quiet_hours_end(quiet: &QuietHours, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let offset = ChronoDuration::minutes(i64::from(quiet.utc_offset_minutes));
    let local = now + offset;
    let local_time = local.time();

    let inside = if quiet.start <= quiet.end {
        local_time >= quiet.start && local_time < quiet.end
    } else {
        // Window wraps midnight (e.g. 22:00-07:00).
        local_time >= quiet.start || local_time < quiet.end
    };
    if !inside {
        return None;
    }

    let end_today = local.date_naive().and_time(quiet.end);
    let local_naive = local.naive_utc();
    let end_local = if end_today > local_naive {
        end_today
    } else {
        end_today + ChronoDuration::days(1)
    };
    let wait = end_local - local_naive;
    Some(now + wait)
}
