use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

use crate::config::CacheConfig;

struct Entry {
    value: Value,
    expires_at: Instant,
}

struct Inner {
    entries: HashMap<String, Entry>,
    /// Recency order, most-recently-used at the back. Approximate LRU: a hit
    /// moves the key to the back by removing and re-pushing instead of an
    /// in-place splice, which is fine at the capacities this cache runs at
    /// (spec.md default 1000 entries).
    recency: VecDeque<String>,
}

/// LRU cache keyed by a fingerprint of `(target, action, input)`
/// (spec.md §4.6). Cache hits bypass the target entirely.
pub struct ResilienceCache {
    config: CacheConfig,
    inner: Mutex<Inner>,
}

impl ResilienceCache {
    pub fn new(config: CacheConfig) -> Self {
        ResilienceCache {
            config,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                recency: VecDeque::new(),
            }),
        }
    }

    pub fn fingerprint(target: &str, action: &str, input: &Value) -> String {
        format!("{target}:{action}:{input}")
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        if !self.config.enabled {
            return None;
        }
        let mut inner = self.inner.lock();
        let hit = match inner.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => None,
            None => return None,
        };
        if hit.is_none() {
            inner.entries.remove(key);
            inner.recency.retain(|k| k != key);
            return None;
        }
        inner.recency.retain(|k| k != key);
        inner.recency.push_back(key.to_string());
        hit
    }

    pub fn put(&self, key: String, value: Value) {
        if !self.config.enabled {
            return;
        }
        let mut inner = self.inner.lock();
        inner.recency.retain(|k| k != &key);
        inner.entries.insert(
            key.clone(),
            Entry {
                value,
                expires_at: Instant::now() + self.config.ttl,
            },
        );
        inner.recency.push_back(key);

        let capacity = self.config.capacity;
        while inner.entries.len() > capacity {
            if let Some(evicted) = inner.recency.pop_front() {
                inner.entries.remove(&evicted);
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hit_returns_the_stored_value() {
        let cache = ResilienceCache::new(CacheConfig::default());
        cache.put("k1".into(), json!({"result": 1}));
        assert_eq!(cache.get("k1"), Some(json!({"result": 1})));
    }

    #[test]
    fn miss_on_unknown_key() {
        let cache = ResilienceCache::new(CacheConfig::default());
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn disabled_cache_never_stores() {
        let cache = ResilienceCache::new(CacheConfig::default().with_enabled(false));
        cache.put("k1".into(), json!(1));
        assert_eq!(cache.get("k1"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let cache = ResilienceCache::new(CacheConfig::default().with_capacity(2));
        cache.put("a".into(), json!(1));
        cache.put("b".into(), json!(2));
        cache.get("a"); // touch a, making b the least recently used
        cache.put("c".into(), json!(3));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("b"), None);
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let cache = ResilienceCache::new(CacheConfig::default().with_ttl(Duration::from_millis(0)));
        cache.put("k1".into(), json!(1));
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(cache.get("k1"), None);
    }
}
