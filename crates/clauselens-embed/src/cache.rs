//! LRU cache for query embeddings.
//!
//! Search queries repeat heavily in practice; caching skips the round trip
//! to the embedding model. Default: 1000 entries, 1-hour TTL.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use ndarray::Array1;
use parking_lot::Mutex;

struct Entry {
    vector: Array1<f32>,
    inserted_at: Instant,
}

/// Thread-safe LRU cache keyed by query text.
pub struct EmbeddingCache {
    inner: Mutex<Inner>,
}

struct Inner {
    entries: HashMap<String, Entry>,
    order: Vec<String>,
    capacity: usize,
    ttl: Duration,
}

impl EmbeddingCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::with_capacity(capacity),
                order: Vec::with_capacity(capacity),
                capacity,
                ttl,
            }),
        }
    }

    /// Default settings: 1000 entries, 1-hour TTL.
    pub fn default_cache() -> Self {
        Self::new(1000, Duration::from_secs(3600))
    }

    /// Look up a cached embedding. Expired entries are evicted on access.
    pub fn get(&self, query: &str) -> Option<Array1<f32>> {
        let mut inner = self.inner.lock();

        let expired = inner
            .entries
            .get(query)
            .map(|e| e.inserted_at.elapsed() >= inner.ttl)?;

        if expired {
            let key = query.to_string();
            inner.entries.remove(&key);
            inner.order.retain(|k| k != &key);
            return None;
        }

        let vector = inner.entries.get(query).unwrap().vector.clone();
        if let Some(pos) = inner.order.iter().position(|k| k == query) {
            let key = inner.order.remove(pos);
            inner.order.push(key);
        }
        Some(vector)
    }

    /// Insert or refresh an entry, evicting the oldest past capacity.
    pub fn put(&self, query: String, vector: Array1<f32>) {
        let mut inner = self.inner.lock();

        if inner.entries.contains_key(&query) {
            inner.entries.insert(
                query.clone(),
                Entry {
                    vector,
                    inserted_at: Instant::now(),
                },
            );
            inner.order.retain(|k| k != &query);
            inner.order.push(query);
            return;
        }

        while inner.entries.len() >= inner.capacity && !inner.order.is_empty() {
            let oldest = inner.order.remove(0);
            inner.entries.remove(&oldest);
        }

        inner.order.push(query.clone());
        inner.entries.insert(
            query,
            Entry {
                vector,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_hit_and_miss() {
        let cache = EmbeddingCache::new(8, Duration::from_secs(3600));
        assert!(cache.get("termination clause").is_none());

        cache.put("termination clause".into(), array![0.1, 0.2]);
        assert_eq!(cache.get("termination clause").unwrap(), array![0.1, 0.2]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = EmbeddingCache::new(2, Duration::from_secs(3600));
        cache.put("a".into(), array![1.0]);
        cache.put("b".into(), array![2.0]);

        // Touch "a" so "b" becomes the eviction candidate
        cache.get("a");
        cache.put("c".into(), array![3.0]);

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = EmbeddingCache::new(8, Duration::from_millis(1));
        cache.put("stale".into(), array![1.0]);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("stale").is_none());
        assert!(cache.is_empty());
    }
}
