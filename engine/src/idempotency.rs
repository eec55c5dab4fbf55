//! Dual-tier idempotency service.
//!
//! The durable store is authoritative; the cache tier is advisory. A
//! record is considered created when either tier confirms the write; a
//! failure on the other tier is logged and repaired on the next read.
//! The check protocol follows six steps: missing, expired, fingerprint
//! mismatch, completed, in-flight, failed-with-budget.

use chrono::Duration;
use reservo_core::clock::SharedClock;
use reservo_core::config::IdempotencyConfig;
use reservo_core::domain::idempotency::{
    CheckOutcome, IdempotencyConflict, IdempotencyRecord, IdempotencyStatus, RequestMeta,
    ResponseMeta, StageTimings,
};
use reservo_core::error::StoreError;
use reservo_core::fingerprint;
use reservo_core::ids::TenantId;
use reservo_core::stores::{IdempotencyCache, IdempotencyStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters exposed for monitoring.
#[derive(Debug, Default)]
pub struct IdempotencyStats {
    /// Requests allowed to proceed.
    pub proceeded: AtomicU64,
    /// Cached responses replayed.
    pub replays: AtomicU64,
    /// Fingerprint or state conflicts.
    pub conflicts: AtomicU64,
    /// Callers told to wait on an in-flight request.
    pub waits: AtomicU64,
}

impl IdempotencyStats {
    /// Snapshot as plain numbers.
    #[must_use]
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.proceeded.load(Ordering::Relaxed),
            self.replays.load(Ordering::Relaxed),
            self.conflicts.load(Ordering::Relaxed),
            self.waits.load(Ordering::Relaxed),
        )
    }
}

/// The idempotency gate in front of every write operation.
pub struct IdempotencyService {
    durable: Arc<dyn IdempotencyStore>,
    cache: Option<Arc<dyn IdempotencyCache>>,
    clock: SharedClock,
    config: IdempotencyConfig,
    stats: IdempotencyStats,
}

impl IdempotencyService {
    /// Wire up the service.
    #[must_use]
    pub fn new(
        durable: Arc<dyn IdempotencyStore>,
        cache: Option<Arc<dyn IdempotencyCache>>,
        clock: SharedClock,
        config: IdempotencyConfig,
    ) -> Self {
        Self {
            durable,
            cache,
            clock,
            config,
            stats: IdempotencyStats::default(),
        }
    }

    /// Monitoring counters.
    #[must_use]
    pub const fn stats(&self) -> &IdempotencyStats {
        &self.stats
    }

    async fn fetch(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        if let Some(cache) = &self.cache {
            match cache.get(tenant_id, key).await {
                Ok(Some(record)) => return Ok(Some(record)),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(key, error = %err, "idempotency cache read failed, using durable tier");
                }
            }
        }
        let record = self.durable.get(tenant_id, key).await?;
        if let (Some(cache), Some(record)) = (&self.cache, &record) {
            self.repopulate(cache, record).await;
        }
        Ok(record)
    }

    async fn repopulate(&self, cache: &Arc<dyn IdempotencyCache>, record: &IdempotencyRecord) {
        let ttl = (record.expires_at - self.clock.now())
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(1));
        if let Err(err) = cache.put(record, ttl).await {
            tracing::warn!(key = %record.key, error = %err, "idempotency cache write failed");
        }
    }

    /// Run the check protocol for `(key, tenant)` against `meta`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] only on durable-tier failure; every protocol
    /// outcome is expressed through [`CheckOutcome`].
    pub async fn check(
        &self,
        tenant_id: TenantId,
        key: &str,
        meta: &RequestMeta,
    ) -> Result<CheckOutcome, StoreError> {
        let Some(record) = self.fetch(tenant_id, key).await? else {
            self.stats.proceeded.fetch_add(1, Ordering::Relaxed);
            return Ok(CheckOutcome::proceed());
        };

        let now = self.clock.now();
        if record.expires_at <= now {
            // Mark expired out of band; the caller proceeds as if new.
            let _ = self
                .durable
                .transition(
                    tenant_id,
                    key,
                    record.status,
                    IdempotencyStatus::Expired,
                    None,
                    record.timings,
                    now,
                )
                .await;
            if let Some(cache) = &self.cache {
                let _ = cache.remove(tenant_id, key).await;
            }
            self.stats.proceeded.fetch_add(1, Ordering::Relaxed);
            return Ok(CheckOutcome::proceed_expired());
        }

        if record.fingerprint != fingerprint::compute(meta) {
            self.stats.conflicts.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("idempotency.fingerprint_conflict").increment(1);
            return Ok(CheckOutcome::conflict(IdempotencyConflict::FingerprintMismatch));
        }

        match record.status {
            IdempotencyStatus::Completed => {
                self.stats.replays.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("idempotency.replay").increment(1);
                record.response_meta.map_or(
                    Ok(CheckOutcome::conflict(IdempotencyConflict::InvalidState)),
                    |response| Ok(CheckOutcome::replay(response)),
                )
            }
            IdempotencyStatus::Pending | IdempotencyStatus::Processing => {
                self.stats.waits.fetch_add(1, Ordering::Relaxed);
                Ok(CheckOutcome::wait(self.config.wait_ms))
            }
            IdempotencyStatus::Failed if record.retry_count < record.max_retries => {
                self.stats.proceeded.fetch_add(1, Ordering::Relaxed);
                Ok(CheckOutcome::proceed())
            }
            _ => {
                self.stats.conflicts.fetch_add(1, Ordering::Relaxed);
                Ok(CheckOutcome::conflict(IdempotencyConflict::InvalidState))
            }
        }
    }

    /// Claim the key for this request: create the record (or revive a
    /// failed one) and move it to `processing`. Returns `false` when a
    /// concurrent request won the race.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on durable-tier failure.
    pub async fn start_processing(
        &self,
        tenant_id: TenantId,
        key: &str,
        meta: &RequestMeta,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let record = IdempotencyRecord {
            key: key.to_string(),
            tenant_id,
            fingerprint: fingerprint::compute(meta),
            status: IdempotencyStatus::Pending,
            request_meta: meta.clone(),
            response_meta: None,
            expires_at: now + Duration::minutes(self.config.default_expiration_minutes),
            retry_count: 0,
            max_retries: self.config.max_retries,
            saga_id: None,
            transaction_id: None,
            timings: StageTimings::default(),
            created_at: now,
            updated_at: now,
        };

        let claimed = if self.durable.insert(&record).await? {
            self.durable
                .transition(
                    tenant_id,
                    key,
                    IdempotencyStatus::Pending,
                    IdempotencyStatus::Processing,
                    None,
                    StageTimings::default(),
                    now,
                )
                .await?
        } else {
            // The record exists: only a failed one with budget may be revived.
            self.durable
                .transition(
                    tenant_id,
                    key,
                    IdempotencyStatus::Failed,
                    IdempotencyStatus::Processing,
                    None,
                    StageTimings::default(),
                    now,
                )
                .await?
        };

        if claimed {
            if let Some(cache) = &self.cache {
                let mut cached = record;
                cached.status = IdempotencyStatus::Processing;
                self.repopulate(cache, &cached).await;
            }
        }
        Ok(claimed)
    }

    /// Record success and cache the response. Called only after the
    /// booking transaction committed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on durable-tier failure.
    pub async fn complete(
        &self,
        tenant_id: TenantId,
        key: &str,
        response: &ResponseMeta,
        timings: StageTimings,
    ) -> Result<bool, StoreError> {
        let moved = self
            .durable
            .transition(
                tenant_id,
                key,
                IdempotencyStatus::Processing,
                IdempotencyStatus::Completed,
                Some(response),
                timings,
                self.clock.now(),
            )
            .await?;
        if moved {
            self.refresh_cache(tenant_id, key).await;
        }
        Ok(moved)
    }

    /// Record failure; the retry budget decides whether another attempt
    /// may claim the key later.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on durable-tier failure.
    pub async fn fail(
        &self,
        tenant_id: TenantId,
        key: &str,
        response: Option<&ResponseMeta>,
        timings: StageTimings,
    ) -> Result<bool, StoreError> {
        let moved = self
            .durable
            .transition(
                tenant_id,
                key,
                IdempotencyStatus::Processing,
                IdempotencyStatus::Failed,
                response,
                timings,
                self.clock.now(),
            )
            .await?;
        if moved {
            self.refresh_cache(tenant_id, key).await;
        }
        Ok(moved)
    }

    async fn refresh_cache(&self, tenant_id: TenantId, key: &str) {
        if let Some(cache) = &self.cache {
            match self.durable.get(tenant_id, key).await {
                Ok(Some(record)) => self.repopulate(cache, &record).await,
                Ok(None) => {
                    let _ = cache.remove(tenant_id, key).await;
                }
                Err(err) => {
                    tracing::warn!(key, error = %err, "cache refresh read failed");
                }
            }
        }
    }

    /// Sweep a batch of expired records. Runs on the maintenance interval.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on durable-tier failure.
    pub async fn sweep(&self) -> Result<u64, StoreError> {
        self.durable
            .delete_expired(self.clock.now(), self.config.sweep_batch_size)
            .await
    }
}
