//! Fixed-capacity LRU cache
//!
//! One mutex guards the map and the recency queue together, so the entry
//! count can never exceed capacity even under concurrent `put`s.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use super::memory_governor::Reclaimable;

#[derive(Debug)]
pub struct ResourceCache<K, V> {
    label: &'static str,
    capacity: usize,
    inner: Mutex<Inner<K, V>>,
}

#[derive(Debug)]
struct Inner<K, V> {
    map: HashMap<K, V>,
    // front = most-recent, back = least-recent
    lru: VecDeque<K>,
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone,
{
    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.lru.iter().position(|k| k == key) {
            self.lru.remove(pos);
        }
        self.lru.push_front(key.clone());
    }
}

impl<K, V> ResourceCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Capacity below 1 is raised to 1
    pub fn new(capacity: usize) -> Self {
        Self::with_label("cache", capacity)
    }

    /// Name used when the cache is registered with the memory governor
    pub fn with_label(label: &'static str, capacity: usize) -> Self {
        Self {
            label,
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                lru: VecDeque::new(),
            }),
        }
    }

    /// Get and bump recency
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let value = inner.map.get(key).cloned()?;
        inner.touch(key);
        Some(value)
    }

    /// Insert or update, evicting the least recently used entry on overflow
    ///
    /// Returns the evicted key, if any.
    pub fn put(&self, key: K, value: V) -> Option<K> {
        let mut inner = self.inner.lock();

        if inner.map.contains_key(&key) {
            inner.map.insert(key.clone(), value);
            inner.touch(&key);
            return None;
        }

        let mut evicted = None;
        if inner.map.len() >= self.capacity {
            if let Some(old) = inner.lru.pop_back() {
                inner.map.remove(&old);
                evicted = Some(old);
            }
        }

        inner.map.insert(key.clone(), value);
        inner.lru.push_front(key);
        evicted
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.lock().map.contains_key(key)
    }

    /// Remove everything; returns how many entries were dropped
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let dropped = inner.map.len();
        inner.map.clear();
        inner.lru.clear();
        dropped
    }

    /// Evict least recently used entries until at most `target` remain
    pub fn shrink_to(&self, target: usize) -> usize {
        let mut inner = self.inner.lock();
        let mut dropped = 0;
        while inner.map.len() > target {
            match inner.lru.pop_back() {
                Some(old) => {
                    inner.map.remove(&old);
                    dropped += 1;
                }
                None => break,
            }
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<K, V> Reclaimable for ResourceCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn name(&self) -> &str {
        self.label
    }

    fn evict_all(&self) -> usize {
        self.clear()
    }

    fn reclaim(&self) -> usize {
        self.shrink_to(self.capacity / 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = ResourceCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.get(&"a"), Some(1));

        let evicted = cache.put("c", 3);

        assert_eq!(evicted, Some("b"));
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_update_refreshes_recency_without_eviction() {
        let cache = ResourceCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.put("a", 10), None);

        cache.put("c", 3);

        assert_eq!(cache.get(&"a"), Some(10));
        assert!(!cache.contains_key(&"b"));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache = ResourceCache::new(0);
        cache.put(1, "x");
        cache.put(2, "y");
        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&2), Some("y"));
    }

    #[test]
    fn test_clear_and_shrink() {
        let cache = ResourceCache::new(10);
        for i in 0..6 {
            cache.put(i, i * 10);
        }
        cache.get(&0);

        assert_eq!(cache.shrink_to(3), 3);
        assert!(cache.contains_key(&0));
        assert!(!cache.contains_key(&1));
        assert_eq!(cache.clear(), 3);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_puts_never_exceed_capacity() {
        let cache = Arc::new(ResourceCache::new(16));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        cache.put(t * 1000 + i, i);
                        assert!(cache.len() <= 16);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 16);
    }
}
