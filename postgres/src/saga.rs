//! PostgreSQL saga store.

use crate::gateway::map_sqlx_error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reservo_core::domain::saga::{
    ParticipantStatus, SagaExecution, SagaStatus, TransactionParticipant,
};
use reservo_core::error::StoreError;
use reservo_core::ids::{SagaId, TenantId, TransactionId};
use reservo_core::stores::SagaStore;
use sqlx::{PgPool, Row};

/// Saga store over a shared pool.
#[derive(Clone)]
pub struct PgSagaStore {
    pool: PgPool,
}

impl PgSagaStore {
    /// Create the store.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode_strings(value: serde_json::Value) -> Vec<String> {
    serde_json::from_value(value).unwrap_or_default()
}

#[async_trait]
impl SagaStore for PgSagaStore {
    async fn insert(&self, execution: &SagaExecution) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO saga_executions
                (saga_id, tenant_id, name, status, steps, completed_steps, results,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(execution.saga_id.0)
        .bind(execution.tenant_id.0)
        .bind(&execution.name)
        .bind(execution.status.as_str())
        .bind(serde_json::json!(execution.steps))
        .bind(serde_json::json!(execution.completed_steps))
        .bind(serde_json::Value::Array(execution.results.clone()))
        .bind(execution.created_at)
        .bind(execution.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn update(&self, execution: &SagaExecution) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE saga_executions
            SET status = $1, completed_steps = $2, results = $3, updated_at = $4
            WHERE saga_id = $5
            ",
        )
        .bind(execution.status.as_str())
        .bind(serde_json::json!(execution.completed_steps))
        .bind(serde_json::Value::Array(execution.results.clone()))
        .bind(execution.updated_at)
        .bind(execution.saga_id.0)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get(&self, saga_id: SagaId) -> Result<Option<SagaExecution>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT saga_id, tenant_id, name, status, steps, completed_steps, results,
                   created_at, updated_at
            FROM saga_executions
            WHERE saga_id = $1
            ",
        )
        .bind(saga_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(|row| {
            let status: String = row.get("status");
            let results: serde_json::Value = row.get("results");
            Ok(SagaExecution {
                saga_id: SagaId(row.get("saga_id")),
                tenant_id: TenantId(row.get("tenant_id")),
                name: row.get("name"),
                status: SagaStatus::parse(&status)?,
                steps: decode_strings(row.get("steps")),
                completed_steps: decode_strings(row.get("completed_steps")),
                results: results.as_array().cloned().unwrap_or_default(),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
        })
        .transpose()
    }

    async fn upsert_participant(
        &self,
        participant: &TransactionParticipant,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO transaction_participants
                (transaction_id, saga_id, tenant_id, participant, status,
                 compensation_data, compensation_completed, expires_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (transaction_id, participant)
            DO UPDATE SET status = EXCLUDED.status,
                          compensation_data = EXCLUDED.compensation_data,
                          compensation_completed = EXCLUDED.compensation_completed,
                          updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(participant.transaction_id.0)
        .bind(participant.saga_id.map(|s| s.0))
        .bind(participant.tenant_id.0)
        .bind(&participant.participant)
        .bind(participant.status.as_str())
        .bind(&participant.compensation_data)
        .bind(participant.compensation_completed)
        .bind(participant.expires_at)
        .bind(participant.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn find_stuck(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TransactionParticipant>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT transaction_id, saga_id, tenant_id, participant, status,
                   compensation_data, compensation_completed, expires_at, updated_at
            FROM transaction_participants
            WHERE expires_at <= $1
              AND status NOT IN ('committed', 'aborted', 'compensated', 'failed')
            ORDER BY expires_at
            LIMIT $2
            ",
        )
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| {
                let status: String = row.get("status");
                Ok(TransactionParticipant {
                    transaction_id: TransactionId(row.get("transaction_id")),
                    saga_id: row.get::<Option<uuid::Uuid>, _>("saga_id").map(SagaId),
                    tenant_id: TenantId(row.get("tenant_id")),
                    participant: row.get("participant"),
                    status: ParticipantStatus::parse(&status)?,
                    compensation_data: row.get("compensation_data"),
                    compensation_completed: row.get("compensation_completed"),
                    expires_at: row.get("expires_at"),
                    updated_at: row.get("updated_at"),
                })
            })
            .collect()
    }
}
