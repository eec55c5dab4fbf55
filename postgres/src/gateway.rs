//! Persistence gateway: pool construction, error classification, and
//! transaction scope helpers.

use reservo_core::error::StoreError;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;

/// PostgreSQL connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Connection URL.
    pub url: String,
    /// Maximum pool size.
    pub max_connections: u32,
    /// Minimum idle connections.
    pub min_connections: u32,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Per-connection idle timeout in seconds.
    pub idle_timeout_secs: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/reservo".to_string(),
            max_connections: 20,
            min_connections: 2,
            connect_timeout_secs: 5,
            idle_timeout_secs: 300,
        }
    }
}

impl PostgresConfig {
    /// Build a connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the pool cannot connect.
    pub async fn connect(&self) -> Result<PgPool, StoreError> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(Duration::from_secs(self.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(self.idle_timeout_secs))
            .connect(&self.url)
            .await
            .map_err(|e| StoreError::Database(format!("pool connect failed: {e}")))
    }
}

/// Transaction isolation levels the gateway knows how to set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// The engine's default for booking transactions.
    #[default]
    ReadCommitted,
    /// Snapshot isolation; serialization failures become likelier and are
    /// retried by the engine.
    RepeatableRead,
    /// Full serializability.
    Serializable,
}

impl IsolationLevel {
    const fn as_sql(self) -> &'static str {
        match self {
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

/// Row-lock wait budget per acquisition attempt. Expiry surfaces as a
/// retryable timeout, so the engine's retry loop re-drives the whole
/// transaction instead of queueing behind a stuck writer.
const LOCK_TIMEOUT_MS: u32 = 5000;

/// Begin a transaction at the given isolation level with the lock-wait
/// budget applied.
///
/// # Errors
///
/// Returns [`StoreError`] when BEGIN or SET TRANSACTION fails.
pub async fn begin_with_isolation(
    pool: &PgPool,
    isolation: IsolationLevel,
) -> Result<Transaction<'static, Postgres>, StoreError> {
    let mut tx = pool.begin().await.map_err(map_sqlx_error)?;
    if isolation != IsolationLevel::ReadCommitted {
        sqlx::query(&format!(
            "SET TRANSACTION ISOLATION LEVEL {}",
            isolation.as_sql()
        ))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
    }
    sqlx::query(&format!("SET LOCAL lock_timeout = '{LOCK_TIMEOUT_MS}ms'"))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
    Ok(tx)
}

/// Create a savepoint inside an open transaction, for nested scopes.
///
/// # Errors
///
/// Returns [`StoreError`] when the savepoint cannot be created.
pub async fn savepoint(
    tx: &mut Transaction<'_, Postgres>,
    name: &str,
) -> Result<(), StoreError> {
    sqlx::query(&format!("SAVEPOINT {name}"))
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;
    Ok(())
}

/// Roll back to a savepoint.
///
/// # Errors
///
/// Returns [`StoreError`] when the rollback fails.
pub async fn rollback_to_savepoint(
    tx: &mut Transaction<'_, Postgres>,
    name: &str,
) -> Result<(), StoreError> {
    sqlx::query(&format!("ROLLBACK TO SAVEPOINT {name}"))
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;
    Ok(())
}

/// SQLSTATE codes the engine treats as retryable.
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Classify a sqlx error into the engine's [`StoreError`] taxonomy.
pub fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::PoolTimedOut => StoreError::Timeout("pool acquire timed out".to_string()),
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            if code == SERIALIZATION_FAILURE || code == DEADLOCK_DETECTED {
                metrics::counter!("store.retryable_conflict", "sqlstate" => code.clone())
                    .increment(1);
                StoreError::SerializationConflict(format!("{code}: {db_err}"))
            } else if code == LOCK_NOT_AVAILABLE {
                StoreError::Timeout(format!("lock wait exceeded: {db_err}"))
            } else if db_err.is_unique_violation() {
                StoreError::UniqueViolation(db_err.to_string())
            } else {
                StoreError::Database(db_err.to_string())
            }
        }
        _ => StoreError::Database(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolation_levels_render_to_sql() {
        assert_eq!(IsolationLevel::ReadCommitted.as_sql(), "READ COMMITTED");
        assert_eq!(IsolationLevel::RepeatableRead.as_sql(), "REPEATABLE READ");
        assert_eq!(IsolationLevel::Serializable.as_sql(), "SERIALIZABLE");
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        assert_eq!(map_sqlx_error(sqlx::Error::RowNotFound), StoreError::NotFound);
    }

    #[test]
    fn pool_timeout_is_retryable() {
        let mapped = map_sqlx_error(sqlx::Error::PoolTimedOut);
        assert!(mapped.is_retryable());
    }
}
