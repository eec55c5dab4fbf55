//! In-process LRU tier.
//!
//! Entries carry an absolute expiry and the generation of every tag they
//! were written under. Reads drop entries that are expired or whose tag
//! generation is stale (the sweep-on-read fast path); `invalidate_tag`
//! additionally removes indexed keys eagerly and reports them so the
//! caller can clean the shared tier.

use lru::LruCache;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    raw: String,
    expires_at: Instant,
    tags: Vec<(String, u64)>,
}

/// L1 cache tier.
pub struct MemoryTier {
    entries: Mutex<LruCache<String, Entry>>,
    tag_generations: Mutex<HashMap<String, u64>>,
    tag_index: Mutex<HashMap<String, HashSet<String>>>,
}

impl MemoryTier {
    /// Create a tier holding at most `capacity` entries.
    ///
    /// # Panics
    ///
    /// Never panics: a zero capacity is clamped to one entry.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            tag_generations: Mutex::new(HashMap::new()),
            tag_index: Mutex::new(HashMap::new()),
        }
    }

    fn generation(&self, tag: &str) -> u64 {
        *self.tag_generations.lock().get(tag).unwrap_or(&0)
    }

    /// Look up a key, sweeping expired and tag-stale entries.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        let entry = entries.get(key)?.clone();
        if entry.expires_at <= Instant::now() {
            entries.pop(key);
            return None;
        }
        drop(entries);

        for (tag, written_generation) in &entry.tags {
            if self.generation(tag) > *written_generation {
                self.entries.lock().pop(key);
                return None;
            }
        }
        Some(entry.raw)
    }

    /// Store a value, registering it under `tags`.
    pub fn put(&self, key: &str, raw: String, ttl: Duration, tags: &[String]) {
        let tagged: Vec<(String, u64)> = tags
            .iter()
            .map(|tag| (tag.clone(), self.generation(tag)))
            .collect();

        {
            let mut index = self.tag_index.lock();
            for tag in tags {
                index.entry(tag.clone()).or_default().insert(key.to_string());
            }
        }

        self.entries.lock().put(
            key.to_string(),
            Entry {
                raw,
                expires_at: Instant::now() + ttl,
                tags: tagged,
            },
        );
    }

    /// Store only when the key is absent or expired; `true` when stored.
    #[must_use]
    pub fn put_nx(&self, key: &str, raw: String, ttl: Duration) -> bool {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.peek(key) {
            if existing.expires_at > Instant::now() {
                return false;
            }
        }
        entries.put(
            key.to_string(),
            Entry {
                raw,
                expires_at: Instant::now() + ttl,
                tags: Vec::new(),
            },
        );
        true
    }

    /// Drop a key.
    pub fn remove(&self, key: &str) {
        self.entries.lock().pop(key);
    }

    /// Invalidate a tag: bump its generation, evict indexed keys, and
    /// return them for shared-tier cleanup.
    pub fn invalidate_tag(&self, tag: &str) -> Vec<String> {
        {
            let mut generations = self.tag_generations.lock();
            *generations.entry(tag.to_string()).or_insert(0) += 1;
        }
        let keys: Vec<String> = self
            .tag_index
            .lock()
            .remove(tag)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        {
            let mut entries = self.entries.lock();
            for key in &keys {
                entries.pop(key);
            }
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lru_evicts_least_recently_used() {
        let tier = MemoryTier::new(2);
        tier.put("a", "1".into(), Duration::from_secs(60), &[]);
        tier.put("b", "2".into(), Duration::from_secs(60), &[]);
        let _ = tier.get("a"); // touch a, b is now LRU
        tier.put("c", "3".into(), Duration::from_secs(60), &[]);
        assert!(tier.get("a").is_some());
        assert!(tier.get("b").is_none());
        assert!(tier.get("c").is_some());
    }

    #[test]
    fn sweep_on_read_catches_entries_cached_before_invalidation() {
        let tier = MemoryTier::new(8);
        tier.put("k", "1".into(), Duration::from_secs(60), &["t".to_string()]);
        // Simulate an entry written elsewhere under an old generation: bump
        // the generation without going through the index.
        *tier.tag_generations.lock().entry("t".to_string()).or_insert(0) += 1;
        assert!(tier.get("k").is_none());
    }

    #[test]
    fn invalidate_tag_returns_affected_keys() {
        let tier = MemoryTier::new(8);
        tier.put("x", "1".into(), Duration::from_secs(60), &["t".to_string()]);
        tier.put("y", "2".into(), Duration::from_secs(60), &["t".to_string()]);
        tier.put("z", "3".into(), Duration::from_secs(60), &[]);
        let mut keys = tier.invalidate_tag("t");
        keys.sort();
        assert_eq!(keys, vec!["x".to_string(), "y".to_string()]);
        assert!(tier.get("z").is_some());
    }

    #[test]
    fn put_nx_respects_live_entries_but_replaces_expired() {
        let tier = MemoryTier::new(8);
        assert!(tier.put_nx("lock", "a".into(), Duration::from_millis(10)));
        assert!(!tier.put_nx("lock", "b".into(), Duration::from_secs(60)));
        std::thread::sleep(Duration::from_millis(20));
        assert!(tier.put_nx("lock", "c".into(), Duration::from_secs(60)));
    }
}
