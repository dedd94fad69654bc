use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::chunk::DecodedChunk;

/// Cache hit/miss/eviction counters, for `--verbose` introspection.
#[derive(Default)]
pub struct CacheStatistics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStatistics {
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.evictions.load(Ordering::Relaxed),
        )
    }
}

/// Bounded LRU of decoded chunks keyed by chunk index. Insertions are
/// observed atomically: a reader either sees a chunk absent or fully
/// present, because payloads are shared immutably behind `Arc`.
pub struct ChunkCache {
    inner: Mutex<CacheInner>,
    statistics: CacheStatistics,
}

struct CacheInner {
    capacity: usize,
    /// chunk index -> (payload, last access stamp)
    entries: HashMap<usize, (Arc<DecodedChunk>, u64)>,
    clock: u64,
}

impl ChunkCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                capacity: capacity.max(1),
                entries: HashMap::new(),
                clock: 0,
            }),
            statistics: CacheStatistics::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().unwrap().capacity
    }

    pub fn get(&self, index: usize) -> Option<Arc<DecodedChunk>> {
        let mut inner = self.inner.lock().unwrap();
        inner.clock += 1;
        let clock = inner.clock;
        match inner.entries.get_mut(&index) {
            Some((chunk, stamp)) => {
                *stamp = clock;
                self.statistics.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(chunk))
            }
            None => {
                self.statistics.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Peek without touching statistics or recency, for scheduling decisions.
    pub fn contains(&self, index: usize) -> bool {
        self.inner.lock().unwrap().entries.contains_key(&index)
    }

    pub fn insert(&self, index: usize, chunk: Arc<DecodedChunk>) {
        let mut inner = self.inner.lock().unwrap();
        inner.clock += 1;
        let clock = inner.clock;

        if inner.entries.len() >= inner.capacity && !inner.entries.contains_key(&index) {
            // Evict the least recently used entry. The map is small (a few
            // dozen entries), a scan beats maintaining an intrusive list.
            if let Some(victim) = inner
                .entries
                .iter()
                .min_by_key(|(_, (_, stamp))| *stamp)
                .map(|(&key, _)| key)
            {
                inner.entries.remove(&victim);
                self.statistics.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        inner.entries.insert(index, (chunk, clock));
    }

    pub fn remove(&self, index: usize) {
        self.inner.lock().unwrap().entries.remove(&index);
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn statistics(&self) -> &CacheStatistics {
        &self.statistics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_of(size: usize) -> Arc<DecodedChunk> {
        let mut chunk = DecodedChunk::new(0);
        chunk.bytes = vec![0u8; size];
        Arc::new(chunk)
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = ChunkCache::new(2);
        cache.insert(0, chunk_of(1));
        cache.insert(1, chunk_of(2));
        assert!(cache.get(0).is_some()); // 0 becomes most recent
        cache.insert(2, chunk_of(3));

        assert!(cache.get(0).is_some());
        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_some());
        assert_eq!(cache.statistics().snapshot().2, 1);
    }

    #[test]
    fn reinsert_updates_in_place_without_eviction() {
        let cache = ChunkCache::new(2);
        cache.insert(0, chunk_of(1));
        cache.insert(1, chunk_of(1));
        cache.insert(1, chunk_of(2));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(1).unwrap().bytes.len(), 2);
        assert_eq!(cache.statistics().snapshot().2, 0);
    }

    #[test]
    fn counts_hits_and_misses() {
        let cache = ChunkCache::new(4);
        cache.insert(7, chunk_of(1));
        cache.get(7);
        cache.get(8);
        let (hits, misses, _) = cache.statistics().snapshot();
        assert_eq!((hits, misses), (1, 1));
    }
}
