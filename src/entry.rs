use crate::time;

use std::sync::Arc;
use std::time::Duration;

/// A container for a value in the recency cache.
#[derive(Debug)]
pub(crate) struct CacheEntry<V> {
  /// The user's value, wrapped in an Arc for shared ownership.
  value: Arc<V>,
  /// The expiration timestamp in epoch nanoseconds. 0 means no expiry.
  expires_at: u64,
}

impl<V> CacheEntry<V> {
  /// Creates a `CacheEntry` around an already-shared value.
  pub(crate) fn from_shared(value: Arc<V>, ttl: Option<Duration>) -> Self {
    Self {
      value,
      expires_at: ttl.map_or(0, time::deadline_after),
    }
  }

  /// Returns a clone of the `Arc` containing the value.
  #[inline]
  pub(crate) fn value(&self) -> Arc<V> {
    self.value.clone()
  }

  /// Checks whether the entry's deadline has passed.
  #[inline]
  pub(crate) fn is_expired(&self) -> bool {
    self.expires_at > 0 && time::now_nanos() >= self.expires_at
  }
}
