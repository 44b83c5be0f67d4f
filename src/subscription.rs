//! Per-process bookkeeping of which invalidation channels are live.
//!
//! In all-keys mode the process holds one wildcard pattern subscription
//! and this manager is inert. In per-key mode it tracks the set of keys
//! with a live channel, so `SUBSCRIBE` is issued once per key and
//! `UNSUBSCRIBE` only for channels actually held.

use ahash::HashSet;
use parking_lot::Mutex;

/// Whether this process listens to the entire keyspace or only to keys it
/// currently caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionMode {
  /// One `PSUBSCRIBE <prefix>update:*` at startup covers every key.
  AllKeys,
  /// Subscribe per key on first interest, unsubscribe when the key stops
  /// being cached here.
  PerKey,
}

#[derive(Debug)]
pub(crate) struct SubscriptionManager {
  mode: SubscriptionMode,
  keys: Mutex<HashSet<String>>,
}

impl SubscriptionManager {
  pub(crate) fn new(mode: SubscriptionMode) -> Self {
    Self {
      mode,
      keys: Mutex::new(HashSet::default()),
    }
  }

  pub(crate) fn mode(&self) -> SubscriptionMode {
    self.mode
  }

  pub(crate) fn is_all_keys(&self) -> bool {
    self.mode == SubscriptionMode::AllKeys
  }

  /// Records interest in `key`. Returns `true` if a `SUBSCRIBE` must be
  /// issued (per-key mode, first time). Always `false` in all-keys mode.
  pub(crate) fn track(&self, key: &str) -> bool {
    match self.mode {
      SubscriptionMode::AllKeys => false,
      SubscriptionMode::PerKey => self.keys.lock().insert(key.to_owned()),
    }
  }

  /// Drops interest in `key`. Returns `true` if an `UNSUBSCRIBE` must be
  /// issued (per-key mode, key was tracked).
  pub(crate) fn untrack(&self, key: &str) -> bool {
    match self.mode {
      SubscriptionMode::AllKeys => false,
      SubscriptionMode::PerKey => self.keys.lock().remove(key),
    }
  }

  #[cfg(test)]
  pub(crate) fn is_tracked(&self, key: &str) -> bool {
    self.keys.lock().contains(key)
  }
}
