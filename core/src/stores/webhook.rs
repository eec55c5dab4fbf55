//! Webhook deduplication seam.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// First-arrival bookkeeping for incoming provider events.
///
/// `(provider, provider_event_id)` is unique; the second arrival of the
/// same event is acknowledged without re-invoking handlers.
#[async_trait]
pub trait WebhookDedupStore: Send + Sync {
    /// Record an arrival. Returns `true` for the first arrival, `false`
    /// for a replay.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn record(
        &self,
        provider: &str,
        provider_event_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Drop dedup rows older than `before`. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn prune(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;
}
