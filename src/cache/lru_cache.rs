use dashmap::DashMap;
use std::{
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tracing::debug;

/// Entrada del cache con marca de acceso para LRU y TTL opcional
#[derive(Debug)]
struct CacheEntry<V> {
    value: Arc<V>,
    created_at: Instant,
    last_access: AtomicU64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        ttl.is_some_and(|ttl| self.created_at.elapsed() > ttl)
    }

    /// Solo el cache conserva el valor: nadie lo está usando
    fn is_unreferenced(&self) -> bool {
        Arc::strong_count(&self.value) == 1
    }
}

/// Bounded LRU cache of shared values.
///
/// Values are handed out as `Arc<V>`. An entry whose value is still held
/// outside the cache (for example a song that is currently streaming) is
/// pinned: neither capacity eviction nor TTL cleanup removes it, so the cache
/// may briefly exceed its capacity while everything in it is in use.
#[derive(Debug)]
pub struct LRUCache<K: Clone + Eq + Hash, V> {
    data: DashMap<K, CacheEntry<V>>,
    capacity: usize,
    ttl: Option<Duration>,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<K, V> LRUCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
    V: Send + Sync + 'static,
{
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            data: DashMap::new(),
            capacity: capacity.max(1),
            ttl,
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let found = self.data.get(key).and_then(|entry| {
            if entry.is_expired(self.ttl) && entry.is_unreferenced() {
                None
            } else {
                entry.last_access.store(self.tick(), Ordering::Relaxed);
                Some(entry.value.clone())
            }
        });

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    pub fn insert(&self, key: K, value: Arc<V>) {
        let entry = CacheEntry {
            value,
            created_at: Instant::now(),
            last_access: AtomicU64::new(self.tick()),
        };
        self.data.insert(key.clone(), entry);
        self.evict_over_capacity(&key);
    }

    #[cfg(test)]
    pub fn contains(&self, key: &K) -> bool {
        self.data.contains_key(key)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    fn evict_over_capacity(&self, just_inserted: &K) {
        while self.data.len() > self.capacity {
            let victim = self
                .data
                .iter()
                .filter(|entry| entry.key() != just_inserted && entry.value().is_unreferenced())
                .min_by_key(|entry| entry.value().last_access.load(Ordering::Relaxed))
                .map(|entry| entry.key().clone());

            let Some(victim) = victim else {
                debug!("Cache sobre capacidad pero todas las entradas están en uso");
                return;
            };

            if self
                .data
                .remove_if(&victim, |_, entry| entry.is_unreferenced())
                .is_some()
            {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!("Entrada desalojada del cache: {:?}", victim);
            }
        }
    }

    /// Limpia entradas expiradas y retorna el número de elementos removidos
    pub fn cleanup_expired(&self) -> usize {
        let before = self.data.len();
        self.data
            .retain(|_, entry| !(entry.is_expired(self.ttl) && entry.is_unreferenced()));
        let removed = before.saturating_sub(self.data.len());

        if removed > 0 {
            debug!("Limpiadas {} entradas expiradas del cache", removed);
        }

        removed
    }

    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.data.len(),
        }
    }
}

/// Métricas básicas del cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let cache = LRUCache::new(2, None);
        cache.insert("a", Arc::new(1));
        cache.insert("b", Arc::new(2));
        assert!(cache.get(&"a").is_some());

        cache.insert("c", Arc::new(3));

        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&"a"));
        assert!(!cache.contains(&"b"));
        assert!(cache.contains(&"c"));
        assert_eq!(cache.metrics().evictions, 1);
    }

    #[test]
    fn referenced_entries_are_pinned() {
        let cache = LRUCache::new(1, None);
        cache.insert("playing", Arc::new(1));
        let held = cache.get(&"playing").unwrap();

        cache.insert("next", Arc::new(2));

        // "playing" sigue en uso, así que no se desaloja
        assert!(cache.contains(&"playing"));
        assert!(cache.contains(&"next"));

        drop(held);
        cache.insert("later", Arc::new(3));
        assert!(!cache.contains(&"playing"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn expired_entries_are_cleaned_unless_in_use() {
        let cache = LRUCache::new(10, Some(Duration::ZERO));
        cache.insert("idle", Arc::new(1));
        cache.insert("busy", Arc::new(2));
        let held = cache.data.get(&"busy").map(|e| e.value.clone()).unwrap();

        std::thread::sleep(Duration::from_millis(2));

        assert_eq!(cache.cleanup_expired(), 1);
        assert!(cache.contains(&"busy"));
        assert!(cache.get(&"idle").is_none());
        drop(held);
    }

    #[test]
    fn hit_rate_counts_lookups() {
        let cache: LRUCache<&str, i32> = LRUCache::new(4, None);
        assert_eq!(cache.metrics().hit_rate(), 0.0);
        cache.insert("a", Arc::new(1));
        cache.get(&"a");
        cache.get(&"b");
        assert_eq!(cache.metrics().hit_rate(), 0.5);
    }
}
