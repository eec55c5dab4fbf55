//! Two-tier cache with tagged invalidation.
//!
//! Availability reads and catalog lookups go through a [`TieredCache`]: an
//! in-process LRU (L1) in front of an optional shared Redis tier (L2).
//! Writes attach tags; invalidating a tag drops every key written under it
//! in both tiers, and a generation check on read catches entries that were
//! cached before the last invalidation (sweep-on-read fast path).
//!
//! Cache failures are never surfaced: a failing tier logs and the caller
//! falls through to the origin.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod memory;
pub mod redis_tier;

pub use memory::MemoryTier;
pub use redis_tier::RedisTier;

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Two-tier cache: L1 in-process LRU, optional L2 Redis.
pub struct TieredCache {
    memory: MemoryTier,
    redis: Option<RedisTier>,
}

impl TieredCache {
    /// In-process only.
    #[must_use]
    pub fn in_process(capacity: usize) -> Self {
        Self {
            memory: MemoryTier::new(capacity),
            redis: None,
        }
    }

    /// In-process L1 backed by a shared Redis L2.
    #[must_use]
    pub fn with_redis(capacity: usize, redis: RedisTier) -> Self {
        Self {
            memory: MemoryTier::new(capacity),
            redis: Some(redis),
        }
    }

    /// Look up `key`, trying L1 then L2. An L2 hit repopulates L1 with the
    /// remaining TTL unknown, so a short default is used.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if let Some(raw) = self.memory.get(key) {
            metrics::counter!("cache.hit", "tier" => "l1").increment(1);
            return decode(key, &raw);
        }

        if let Some(redis) = &self.redis {
            match redis.get(key).await {
                Ok(Some(raw)) => {
                    metrics::counter!("cache.hit", "tier" => "l2").increment(1);
                    self.memory.put(key, raw.clone(), Duration::from_secs(15), &[]);
                    return decode(key, &raw);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(key, error = %err, "redis read failed, falling through");
                }
            }
        }

        metrics::counter!("cache.miss").increment(1);
        None
    }

    /// Store `value` under `key` with `ttl`, registered under `tags`.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T, ttl: Duration, tags: &[String]) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache encode failed, skipping write");
                return;
            }
        };
        self.memory.put(key, raw.clone(), ttl, tags);
        if let Some(redis) = &self.redis {
            if let Err(err) = redis.set(key, &raw, ttl).await {
                tracing::warn!(key, error = %err, "redis write failed, L1 only");
            }
        }
    }

    /// Drop one key from both tiers.
    pub async fn remove(&self, key: &str) {
        self.memory.remove(key);
        if let Some(redis) = &self.redis {
            if let Err(err) = redis.del(key).await {
                tracing::warn!(key, error = %err, "redis delete failed");
            }
        }
    }

    /// Invalidate every key written under `tag`.
    ///
    /// L1 entries are removed eagerly through the tag index and the tag
    /// generation is bumped so entries cached elsewhere fail the
    /// sweep-on-read check. Keys this process wrote to L2 are deleted there
    /// too.
    pub async fn invalidate_tag(&self, tag: &str) {
        let keys = self.memory.invalidate_tag(tag);
        metrics::counter!("cache.tag_invalidated").increment(1);
        if let Some(redis) = &self.redis {
            for key in keys {
                if let Err(err) = redis.del(&key).await {
                    tracing::warn!(key, error = %err, "redis delete failed during tag invalidation");
                }
            }
        }
    }

    /// Atomic `SET key value EX ttl NX` for mutual-exclusion uses; `true`
    /// when the lock was taken. Falls back to the L1 tier when no Redis is
    /// configured (single-process deployments).
    pub async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> bool {
        if let Some(redis) = &self.redis {
            match redis.set_nx(key, value, ttl).await {
                Ok(taken) => return taken,
                Err(err) => {
                    tracing::warn!(key, error = %err, "redis set_nx failed, falling back to L1");
                }
            }
        }
        self.memory.put_nx(key, value.to_string(), ttl)
    }
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(key, error = %err, "cache decode failed, treating as miss");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_roundtrip() {
        let cache = TieredCache::in_process(16);
        cache
            .put("k", &vec![1, 2, 3], Duration::from_secs(60), &[])
            .await;
        let got: Option<Vec<i32>> = cache.get("k").await;
        assert_eq!(got, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn miss_after_remove() {
        let cache = TieredCache::in_process(16);
        cache.put("k", &1u32, Duration::from_secs(60), &[]).await;
        cache.remove("k").await;
        let got: Option<u32> = cache.get("k").await;
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn tag_invalidation_drops_tagged_keys_only() {
        let cache = TieredCache::in_process(16);
        let tag = "availability:t1:r1".to_string();
        cache
            .put("slots:a", &1u32, Duration::from_secs(60), std::slice::from_ref(&tag))
            .await;
        cache.put("slots:b", &2u32, Duration::from_secs(60), &[]).await;

        cache.invalidate_tag(&tag).await;

        assert_eq!(cache.get::<u32>("slots:a").await, None);
        assert_eq!(cache.get::<u32>("slots:b").await, Some(2));
    }

    #[tokio::test]
    async fn set_nx_is_exclusive() {
        let cache = TieredCache::in_process(16);
        assert!(cache.set_nx("lock:r1", "w1", Duration::from_secs(5)).await);
        assert!(!cache.set_nx("lock:r1", "w2", Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn expired_entries_miss() {
        let cache = TieredCache::in_process(16);
        cache.put("k", &1u32, Duration::from_millis(10), &[]).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get::<u32>("k").await, None);
    }
}
