//! The bounded recency (LRU) cache underneath the fill coordinator.
//!
//! Recency order is maintained on both reads and writes. Expired entries
//! are treated as absent and dropped lazily on access. Absence is a normal
//! result, never an error.

use crate::entry::CacheEntry;

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use ahash::HashMap;

/// A bounded mapping from key to value with least-recently-used eviction
/// and optional per-entry expiry.
///
/// Not internally synchronized; callers guard it with a mutex.
#[derive(Debug)]
pub struct RecencyCache<K, V> {
  map: HashMap<K, CacheEntry<V>>,
  // A queue of keys ordered by recent use (front is most recent).
  order: VecDeque<K>,
  capacity: usize,
}

impl<K, V> RecencyCache<K, V>
where
  K: Eq + Hash + Clone,
{
  /// Creates a cache bounded to `capacity` entries.
  pub fn new(capacity: usize) -> Self {
    Self {
      map: HashMap::default(),
      order: VecDeque::new(),
      capacity,
    }
  }

  /// Retrieves a value, bumping its recency.
  ///
  /// An expired entry is removed and reported as absent.
  pub fn get(&mut self, key: &K) -> Option<Arc<V>> {
    match self.map.get(key) {
      Some(entry) if entry.is_expired() => {
        self.map.remove(key);
        self.order.retain(|k| k != key);
        None
      }
      Some(entry) => {
        let value = entry.value();
        self.touch(key);
        Some(value)
      }
      None => None,
    }
  }

  /// Inserts or replaces an entry, evicting from the least recently used
  /// end if the bound is exceeded.
  pub fn insert(&mut self, key: K, value: V, ttl: Option<Duration>) {
    self.insert_shared(key, Arc::new(value), ttl);
  }

  /// Like [`insert`](Self::insert), for a value that is already shared.
  ///
  /// The fill coordinator and the coherence layer hand the same `Arc` to
  /// the cache and to their waiters.
  pub(crate) fn insert_shared(&mut self, key: K, value: Arc<V>, ttl: Option<Duration>) {
    if self.map.insert(key.clone(), CacheEntry::from_shared(value, ttl)).is_some() {
      self.touch(&key);
    } else {
      self.order.push_front(key);
    }

    while self.map.len() > self.capacity {
      if let Some(victim) = self.order.pop_back() {
        self.map.remove(&victim);
      } else {
        break;
      }
    }
  }

  /// Reports whether a live (non-expired) entry exists, without touching
  /// recency order.
  pub fn contains(&self, key: &K) -> bool {
    self.map.get(key).is_some_and(|entry| !entry.is_expired())
  }

  /// Removes an entry, returning `true` if the key was present.
  pub fn remove(&mut self, key: &K) -> bool {
    if self.map.remove(key).is_some() {
      self.order.retain(|k| k != key);
      true
    } else {
      false
    }
  }

  /// The number of entries currently held, expired ones included until
  /// their lazy removal.
  pub fn len(&self) -> usize {
    self.map.len()
  }

  /// Returns `true` if the cache holds no entries.
  pub fn is_empty(&self) -> bool {
    self.map.is_empty()
  }

  /// Move a key to the front of the usage queue.
  fn touch(&mut self, key: &K) {
    if let Some(pos) = self.order.iter().position(|k| k == key) {
      if let Some(key) = self.order.remove(pos) {
        self.order.push_front(key);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn eviction_prefers_least_recently_used() {
    let mut cache = RecencyCache::new(2);
    cache.insert("a", 1, None);
    cache.insert("b", 2, None);

    // Touch "a" so "b" becomes the eviction victim.
    assert_eq!(cache.get(&"a").as_deref(), Some(&1));
    cache.insert("c", 3, None);

    assert!(cache.contains(&"a"));
    assert!(!cache.contains(&"b"));
    assert!(cache.contains(&"c"));
    assert_eq!(cache.len(), 2);
  }

  #[test]
  fn replacing_does_not_grow() {
    let mut cache = RecencyCache::new(2);
    cache.insert("a", 1, None);
    cache.insert("a", 2, None);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get(&"a").as_deref(), Some(&2));
  }

  #[test]
  fn expired_entries_are_absent() {
    let mut cache = RecencyCache::new(4);
    cache.insert("a", 1, Some(Duration::ZERO));
    std::thread::sleep(Duration::from_millis(2));
    assert!(!cache.contains(&"a"));
    assert_eq!(cache.get(&"a"), None);
    assert_eq!(cache.len(), 0);
  }
}
