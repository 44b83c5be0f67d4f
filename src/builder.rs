use crate::backend::StoreBackend;
use crate::coherent::{CoherentCache, CoherentShared};
use crate::error::BuildError;
use crate::flight::FillCoordinator;
use crate::metrics::Metrics;
use crate::subscription::{SubscriptionManager, SubscriptionMode};

use core::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A builder for creating [`CoherentCache`] instances.
///
/// Only a backend is mandatory. Unset options resolve as the
/// corresponding store deployment conventions suggest: `subscribe_all`
/// derives from whether a `key_prefix` is configured (a namespaced
/// process is assumed to cache a large overlapping slice of its
/// keyspace), persistence is on, and writes without an explicit ttl fall
/// back to `default_age` (60 seconds unless overridden).
pub struct CacheBuilder<V: Send> {
  capacity: usize,
  subscribe_all: Option<bool>,
  persistent: bool,
  key_prefix: Option<String>,
  update_channel_prefix: Option<String>,
  default_age: Option<Duration>,
  backend: Option<Arc<dyn StoreBackend>>,
  _value_marker: PhantomData<V>,
}

impl<V: Send> fmt::Debug for CacheBuilder<V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheBuilder")
      .field("capacity", &self.capacity)
      .field("subscribe_all", &self.subscribe_all)
      .field("persistent", &self.persistent)
      .field("key_prefix", &self.key_prefix)
      .field("default_age", &self.default_age)
      .field("has_backend", &self.backend.is_some())
      .finish_non_exhaustive()
  }
}

impl<V: Send> CacheBuilder<V> {
  /// Creates a new `CacheBuilder` with default settings.
  pub fn new() -> Self {
    Self {
      capacity: usize::MAX,
      subscribe_all: None,
      persistent: true,
      key_prefix: None,
      update_channel_prefix: None,
      default_age: Some(Duration::from_secs(60)),
      backend: None,
      _value_marker: PhantomData,
    }
  }

  /// Sets the maximum number of entries held locally.
  pub fn capacity(mut self, capacity: usize) -> Self {
    self.capacity = capacity;
    self
  }

  /// Removes the local entry bound.
  pub fn unbounded(mut self) -> Self {
    self.capacity = usize::MAX;
    self
  }

  /// Forces all-keys or per-key subscription mode.
  ///
  /// An explicit value always wins over the derived default
  /// (`true` iff a `key_prefix` is configured).
  pub fn subscribe_all(mut self, subscribe_all: bool) -> Self {
    self.subscribe_all = Some(subscribe_all);
    self
  }

  /// Enables or disables write-through to the persistent store.
  /// Defaults to enabled.
  pub fn persistent(mut self, persistent: bool) -> Self {
    self.persistent = persistent;
    self
  }

  /// Namespaces persisted keys and derived channel names.
  pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.key_prefix = Some(prefix.into());
    self
  }

  /// Overrides the update channel namespace, which otherwise derives as
  /// `<key_prefix>update:`.
  pub fn update_channel_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.update_channel_prefix = Some(prefix.into());
    self
  }

  /// Sets the fallback lifetime applied to writes that carry no explicit
  /// ttl. Defaults to 60 seconds.
  pub fn default_age(mut self, age: Duration) -> Self {
    self.default_age = Some(age);
    self
  }

  /// Disables the fallback lifetime: writes without an explicit ttl are
  /// cached and persisted without expiry.
  pub fn no_default_age(mut self) -> Self {
    self.default_age = None;
    self
  }

  /// Sets the store backend. Required.
  pub fn backend<B: StoreBackend>(mut self, backend: B) -> Self {
    self.backend = Some(Arc::new(backend));
    self
  }
}

impl<V: Send> Default for CacheBuilder<V> {
  fn default() -> Self {
    Self::new()
  }
}

impl<V> CacheBuilder<V>
where
  V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
  /// Builds the cache and starts its update listener.
  ///
  /// Must be called within a tokio runtime: the listener and the
  /// initial wildcard subscription (all-keys mode) are spawned here.
  pub fn build(self) -> Result<CoherentCache<V>, BuildError> {
    if self.capacity == 0 {
      return Err(BuildError::ZeroCapacity);
    }
    let backend = self.backend.ok_or(BuildError::BackendRequired)?;
    let updates = backend.take_updates().ok_or(BuildError::BackendExhausted)?;

    let key_prefix = self.key_prefix.unwrap_or_default();
    // An explicit subscribe_all wins; otherwise a configured key prefix
    // implies all-keys mode.
    let subscribe_all = self.subscribe_all.unwrap_or(!key_prefix.is_empty());
    let update_prefix = self
      .update_channel_prefix
      .unwrap_or_else(|| format!("{key_prefix}update:"));

    let metrics = Arc::new(Metrics::new());
    let shared = Arc::new(CoherentShared {
      flight: Arc::new(FillCoordinator::with_metrics(self.capacity, metrics.clone())),
      backend,
      subs: SubscriptionManager::new(if subscribe_all {
        SubscriptionMode::AllKeys
      } else {
        SubscriptionMode::PerKey
      }),
      persistent: self.persistent,
      key_prefix,
      update_prefix,
      default_age: self.default_age,
      metrics,
      listener: Mutex::new(None),
    });

    shared.spawn_listener(updates);

    if subscribe_all {
      let pattern = format!("{}*", shared.update_prefix);
      let backend = shared.backend.clone();
      tokio::spawn(async move {
        if let Err(error) = backend.subscribe_pattern(&pattern).await {
          tracing::warn!(%error, pattern, "wildcard subscription failed");
        }
      });
    }

    Ok(CoherentCache { shared })
  }
}
