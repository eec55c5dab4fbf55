//! Shared Redis tier.
//!
//! Thin wrapper over a pooled [`ConnectionManager`] exposing exactly the
//! operations the tiered cache needs: `GET`, `SET ... EX`, `DEL`, and the
//! atomic `SET ... EX ... NX` used for mutual exclusion.

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, SetExpiry, SetOptions};
use std::time::Duration;
use thiserror::Error;

/// Redis tier failure. Callers log these and fall through to the origin.
#[derive(Debug, Error)]
pub enum RedisTierError {
    /// Client construction or connection failure.
    #[error("redis connection failed: {0}")]
    Connection(String),
    /// Command failure.
    #[error("redis command failed: {0}")]
    Command(String),
}

/// L2 cache tier.
#[derive(Clone)]
pub struct RedisTier {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisTier {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns [`RedisTierError::Connection`] when the client cannot be
    /// built or the connection manager cannot start.
    pub async fn connect(redis_url: &str, key_prefix: &str) -> Result<Self, RedisTierError> {
        let client = Client::open(redis_url)
            .map_err(|e| RedisTierError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| RedisTierError::Connection(e.to_string()))?;
        Ok(Self {
            conn,
            key_prefix: key_prefix.to_string(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{key}", self.key_prefix)
    }

    /// `GET key`.
    ///
    /// # Errors
    ///
    /// Returns [`RedisTierError::Command`] on command failure.
    pub async fn get(&self, key: &str) -> Result<Option<String>, RedisTierError> {
        let mut conn = self.conn.clone();
        conn.get(self.full_key(key))
            .await
            .map_err(|e| RedisTierError::Command(e.to_string()))
    }

    /// `SET key value EX ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`RedisTierError::Command`] on command failure.
    pub async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), RedisTierError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(self.full_key(key), value, ttl.as_secs().max(1))
            .await
            .map_err(|e| RedisTierError::Command(e.to_string()))?;
        Ok(())
    }

    /// `DEL key`.
    ///
    /// # Errors
    ///
    /// Returns [`RedisTierError::Command`] on command failure.
    pub async fn del(&self, key: &str) -> Result<(), RedisTierError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(self.full_key(key))
            .await
            .map_err(|e| RedisTierError::Command(e.to_string()))?;
        Ok(())
    }

    /// Atomic `SET key value EX ttl NX`; `true` when the key was set.
    ///
    /// # Errors
    ///
    /// Returns [`RedisTierError::Command`] on command failure.
    pub async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, RedisTierError> {
        let mut conn = self.conn.clone();
        let options = SetOptions::default()
            .conditional_set(redis::ExistenceCheck::NX)
            .with_expiration(SetExpiry::EX(ttl.as_secs().max(1)));
        let result: Option<String> = conn
            .set_options(self.full_key(key), value, options)
            .await
            .map_err(|e| RedisTierError::Command(e.to_string()))?;
        Ok(result.is_some())
    }
}
