//! PostgreSQL webhook dedup store.

use crate::gateway::map_sqlx_error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reservo_core::error::StoreError;
use reservo_core::stores::WebhookDedupStore;
use sqlx::PgPool;

/// Webhook dedup store over a shared pool.
#[derive(Clone)]
pub struct PgWebhookDedupStore {
    pool: PgPool,
}

impl PgWebhookDedupStore {
    /// Create the store.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookDedupStore for PgWebhookDedupStore {
    async fn record(
        &self,
        provider: &str,
        provider_event_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            INSERT INTO webhook_events (provider, provider_event_id, received_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (provider, provider_event_id) DO NOTHING
            ",
        )
        .bind(provider)
        .bind(provider_event_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let first_arrival = result.rows_affected() == 1;
        if !first_arrival {
            metrics::counter!("webhook.deduplicated", "provider" => provider.to_string())
                .increment(1);
        }
        Ok(first_arrival)
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM webhook_events WHERE received_at < $1")
            .bind(before)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }
}
