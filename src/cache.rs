//! Bounded LRU cache with per-entry TTL.
//!
//! Used for search results (keyed by query text and search knobs) and owned
//! by whoever needs one; there is no process-global cache. Hit and miss
//! counters are atomic so stats reads never contend with lookups.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// LRU + TTL cache. `capacity` bounds the entry count; entries older than
/// `ttl` are treated as absent and evicted on touch.
pub struct LruTtlCache<K, V> {
    capacity: usize,
    ttl: Duration,
    inner: Mutex<CacheInner<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

struct CacheInner<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    // Front is least recently used.
    order: VecDeque<K>,
}

impl<K, V> LruTtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        LruTtlCache {
            capacity: capacity.max(1),
            ttl,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        match inner.entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() <= self.ttl => {
                let value = entry.value.clone();
                Self::touch(&mut inner.order, key);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Some(_) => {
                inner.entries.remove(key);
                inner.order.retain(|k| k != key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, key: K, value: V) {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        if inner.entries.contains_key(&key) {
            Self::touch(&mut inner.order, &key);
        } else {
            while inner.entries.len() >= self.capacity {
                match inner.order.pop_front() {
                    Some(oldest) => {
                        inner.entries.remove(&oldest);
                    }
                    None => break,
                }
            }
            inner.order.push_back(key.clone());
        }
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop every entry. Counters are left intact.
    pub fn invalidate_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn touch(order: &mut VecDeque<K>, key: &K) {
        if let Some(pos) = order.iter().position(|k| k == key) {
            order.remove(pos);
        }
        order.push_back(key.clone());
    }
}

/// Cache key for similarity searches. The threshold is stored by bit
/// pattern so the key stays hashable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchKey {
    pub query: String,
    pub k: usize,
    pub threshold_bits: Option<u32>,
}

impl SearchKey {
    pub fn new(query: &str, k: usize, threshold: Option<f32>) -> Self {
        SearchKey {
            query: query.to_string(),
            k,
            threshold_bits: threshold.map(f32::to_bits),
        }
    }
}
