//! Similarity-aware embedding cache.
//!
//! Wraps [`lru::LruCache`] the way the teacher's `storage/sqlite.rs` wraps
//! one for its `query_cache` field, adding the TTL and byte-budget
//! bookkeeping a plain query cache doesn't need: this cache sits in front
//! of the GNN enhancer, so its entries are full embeddings, not query
//! rows, and eviction has a real memory cost worth tracking.

use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::embedding::Embedding;

/// Default maximum number of entries.
pub const DEFAULT_ENTRY_CAP: usize = 1000;
/// Default maximum total bytes across all cached embeddings.
pub const DEFAULT_BYTE_CAP: usize = 100 * 1024 * 1024;
/// Default time-to-live for an entry.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// A stable key over a quantized embedding and a sorted set of
/// neighborhood hyperedge ids. Two calls with the same embedding (up to
/// quantization) and the same neighborhood collide on the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Quantizes `embedding` to 4 decimal places and folds in the sorted
    /// neighborhood hyperedge ids, so key equality is robust to
    /// floating-point jitter that doesn't change the semantic vector.
    pub fn compute(embedding: &[f32], neighborhood: &[String]) -> Self {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for v in embedding {
            let quantized = (v * 10_000.0).round() as i64;
            quantized.hash(&mut hasher);
        }
        let mut sorted: Vec<&String> = neighborhood.iter().collect();
        sorted.sort();
        for id in sorted {
            id.hash(&mut hasher);
        }
        Fingerprint(hasher.finish())
    }
}

#[derive(Clone)]
struct Entry {
    embedding: Embedding,
    node_ids: Vec<String>,
    inserted_at: Instant,
    last_access: Instant,
    access_count: u64,
    bytes: usize,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub size: usize,
    pub bytes: usize,
    pub hit_rate: f64,
    pub average_access_count: f64,
    pub oldest_entry_age: Option<Duration>,
    pub eviction_count: u64,
}

struct Inner {
    entries: LruCache<Fingerprint, Entry>,
    byte_cap: usize,
    bytes_used: usize,
    ttl: Duration,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Read-through embedding cache keyed by [`Fingerprint`].
pub struct EmbeddingCache {
    inner: Mutex<Inner>,
}

impl EmbeddingCache {
    pub fn new(entry_cap: usize, byte_cap: usize, ttl: Duration) -> Self {
        let cap = std::num::NonZeroUsize::new(entry_cap.max(1)).expect("cap is at least 1");
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(cap),
                byte_cap,
                bytes_used: 0,
                ttl,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    /// Returns the cached embedding and the node ids it was stored with,
    /// or `None` on miss or TTL expiry (which also evicts the entry).
    pub fn get(&self, key: Fingerprint) -> Option<Embedding> {
        let mut inner = self.inner.lock();
        let ttl = inner.ttl;
        // Peek first so we don't bump recency on an entry we're about to
        // evict for having expired.
        let expired = inner
            .entries
            .peek(&key)
            .map(|e| e.inserted_at.elapsed() > ttl)
            .unwrap_or(false);
        if expired {
            if let Some(e) = inner.entries.pop(&key) {
                inner.bytes_used = inner.bytes_used.saturating_sub(e.bytes);
            }
            inner.misses += 1;
            return None;
        }
        match inner.entries.get_mut(&key) {
            Some(entry) => {
                entry.access_count += 1;
                entry.last_access = Instant::now();
                let result = entry.embedding.clone();
                inner.hits += 1;
                Some(result)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Stores a deep copy of `embedding` under `key`, evicting LRU entries
    /// until both the entry cap and byte cap are satisfied.
    pub fn put(&self, key: Fingerprint, embedding: Embedding, node_ids: Vec<String>) {
        let bytes = embedding.len() * std::mem::size_of::<f32>();
        let mut inner = self.inner.lock();

        if let Some(old) = inner.entries.peek(&key) {
            inner.bytes_used = inner.bytes_used.saturating_sub(old.bytes);
        }

        let now = Instant::now();
        inner.entries.put(
            key,
            Entry {
                embedding,
                node_ids,
                inserted_at: now,
                last_access: now,
                access_count: 0,
                bytes,
            },
        );
        inner.bytes_used += bytes;

        let byte_cap = inner.byte_cap;
        while inner.bytes_used > byte_cap {
            match inner.entries.pop_lru() {
                Some((_, evicted)) => {
                    inner.bytes_used = inner.bytes_used.saturating_sub(evicted.bytes);
                    inner.evictions += 1;
                }
                None => break,
            }
        }
    }

    /// Drops any entry whose stored node ids intersect `node_ids`.
    pub fn invalidate(&self, node_ids: &[String]) {
        let mut inner = self.inner.lock();
        let to_remove: Vec<Fingerprint> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.node_ids.iter().any(|id| node_ids.contains(id)))
            .map(|(k, _)| *k)
            .collect();
        for key in to_remove {
            if let Some(e) = inner.entries.pop(&key) {
                inner.bytes_used = inner.bytes_used.saturating_sub(e.bytes);
                inner.evictions += 1;
            }
        }
    }

    pub fn invalidate_all(&self) {
        self.clear();
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.bytes_used = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let total = inner.hits + inner.misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            inner.hits as f64 / total as f64
        };
        let size = inner.entries.len();
        let average_access_count = if size == 0 {
            0.0
        } else {
            inner.entries.iter().map(|(_, e)| e.access_count).sum::<u64>() as f64 / size as f64
        };
        let oldest_entry_age = inner
            .entries
            .iter()
            .map(|(_, e)| e.inserted_at.elapsed())
            .max();
        CacheStats {
            size,
            bytes: inner.bytes_used,
            hit_rate,
            average_access_count,
            oldest_entry_age,
            eviction_count: inner.evictions,
        }
    }

    /// Bulk `put`, in order; for warming a fresh cache from a snapshot.
    pub fn warm(&self, entries: Vec<(Fingerprint, Embedding, Vec<String>)>) {
        for (key, embedding, node_ids) in entries {
            self.put(key, embedding, node_ids);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::D;

    fn emb(fill: f32) -> Embedding {
        Embedding::new(vec![fill; D]).unwrap()
    }

    #[test]
    fn fingerprint_is_stable_across_calls() {
        let e = vec![0.1f32; D];
        let ids = vec!["a".to_string(), "b".to_string()];
        assert_eq!(
            Fingerprint::compute(&e, &ids).0,
            Fingerprint::compute(&e, &ids).0
        );
    }

    #[test]
    fn fingerprint_ignores_neighborhood_order() {
        let e = vec![0.1f32; D];
        let ids_a = vec!["a".to_string(), "b".to_string()];
        let ids_b = vec!["b".to_string(), "a".to_string()];
        assert_eq!(
            Fingerprint::compute(&e, &ids_a),
            Fingerprint::compute(&e, &ids_b)
        );
    }

    #[test]
    fn miss_then_hit() {
        let cache = EmbeddingCache::new(DEFAULT_ENTRY_CAP, DEFAULT_BYTE_CAP, DEFAULT_TTL);
        let key = Fingerprint::compute(&[0.5; 4], &[]);
        assert!(cache.get(key).is_none());
        cache.put(key, emb(0.2), vec!["n1".into()]);
        assert!(cache.get(key).is_some());
        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.eviction_count, 0);
    }

    #[test]
    fn ttl_expiry_evicts_on_get() {
        let cache = EmbeddingCache::new(DEFAULT_ENTRY_CAP, DEFAULT_BYTE_CAP, Duration::from_millis(1));
        let key = Fingerprint::compute(&[0.5; 4], &[]);
        cache.put(key, emb(0.2), vec![]);
        std::thread::sleep(Duration::from_millis(10));
        assert!(cache.get(key).is_none());
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn invalidate_drops_matching_node_ids() {
        let cache = EmbeddingCache::new(DEFAULT_ENTRY_CAP, DEFAULT_BYTE_CAP, DEFAULT_TTL);
        let key = Fingerprint::compute(&[0.5; 4], &["n1".to_string()]);
        cache.put(key, emb(0.2), vec!["n1".into()]);
        cache.invalidate(&["n1".to_string()]);
        assert!(cache.get(key).is_none());
    }

    #[test]
    fn byte_cap_evicts_lru() {
        let entry_bytes = D * std::mem::size_of::<f32>();
        let cache = EmbeddingCache::new(1000, entry_bytes * 2 + 1, DEFAULT_TTL);
        let k1 = Fingerprint::compute(&[0.1; 4], &["a".into()]);
        let k2 = Fingerprint::compute(&[0.2; 4], &["b".into()]);
        let k3 = Fingerprint::compute(&[0.3; 4], &["c".into()]);
        cache.put(k1, emb(0.1), vec!["a".into()]);
        cache.put(k2, emb(0.2), vec!["b".into()]);
        cache.put(k3, emb(0.3), vec!["c".into()]);
        let stats = cache.stats();
        assert!(stats.bytes <= entry_bytes * 2 + 1);
        assert!(stats.eviction_count >= 1);
        // k1 was least recently used and should be gone.
        assert!(cache.get(k1).is_none());
    }

    #[test]
    fn clear_resets_bytes_and_size() {
        let cache = EmbeddingCache::new(DEFAULT_ENTRY_CAP, DEFAULT_BYTE_CAP, DEFAULT_TTL);
        cache.put(Fingerprint::compute(&[0.1; 4], &[]), emb(0.1), vec![]);
        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.bytes, 0);
    }
}
