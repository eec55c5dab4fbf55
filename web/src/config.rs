//! Server configuration loaded from environment variables.
//!
//! Every value has a sensible default so a bare `reservo-server` boots
//! against localhost services.

use reservo_core::config::EngineConfig;
use reservo_postgres::PostgresConfig;
use serde::{Deserialize, Serialize};
use std::env;

/// Redis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Connection URL.
    pub url: String,
    /// Key prefix for the shared cache tier.
    pub key_prefix: String,
    /// Whether the shared tier is used at all.
    pub enabled: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "reservo".to_string(),
            enabled: false,
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Complete server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Database connection.
    pub postgres: PostgresConfig,
    /// Shared cache tier.
    pub redis: RedisConfig,
    /// HTTP listener.
    pub server: ServerConfig,
    /// Engine knobs.
    pub engine: EngineConfig,
    /// Webhook signing secret shared with providers.
    pub webhook_secret: String,
    /// Tenant-default UTC offset in minutes for business-hours math.
    pub tenant_utc_offset_minutes: i32,
}

fn var_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load from environment variables, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            postgres: PostgresConfig {
                url: var_or("DATABASE_URL", defaults.postgres.url.clone()),
                max_connections: var_or("DATABASE_MAX_CONNECTIONS", defaults.postgres.max_connections),
                min_connections: var_or("DATABASE_MIN_CONNECTIONS", defaults.postgres.min_connections),
                connect_timeout_secs: var_or("DATABASE_CONNECT_TIMEOUT", defaults.postgres.connect_timeout_secs),
                idle_timeout_secs: var_or("DATABASE_IDLE_TIMEOUT", defaults.postgres.idle_timeout_secs),
            },
            redis: RedisConfig {
                url: var_or("REDIS_URL", defaults.redis.url.clone()),
                key_prefix: var_or("REDIS_KEY_PREFIX", defaults.redis.key_prefix.clone()),
                enabled: var_or("REDIS_ENABLED", defaults.redis.enabled),
            },
            server: ServerConfig {
                host: var_or("HTTP_HOST", defaults.server.host.clone()),
                port: var_or("HTTP_PORT", defaults.server.port),
            },
            engine: EngineConfig::default(),
            webhook_secret: var_or("WEBHOOK_SECRET", "whsec_development".to_string()),
            tenant_utc_offset_minutes: var_or("TENANT_UTC_OFFSET_MINUTES", 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_boot_against_localhost() {
        let config = Config::default();
        assert!(config.postgres.url.contains("localhost"));
        assert_eq!(config.server.port, 8080);
        assert!(!config.redis.enabled);
    }
}
