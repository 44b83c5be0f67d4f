//! The coherence layer.
//!
//! Wraps the fill coordinator with a persistent store and a
//! publish/subscribe invalidation channel. Misses are filled from the
//! store; writes go through the local cache synchronously and are
//! persisted and broadcast in the background; incoming broadcasts are
//! applied as local writes only for keys this process currently caches.

use crate::backend::{StoreBackend, Update};
use crate::envelope::WireEnvelope;
use crate::error::CacheError;
use crate::flight::{FillCoordinator, FillValue};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::subscription::SubscriptionManager;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A dogpile-protected LRU cache kept coherent with peer processes
/// through a shared store and its invalidation channels.
///
/// Handles are cheap to clone and share one underlying cache.
pub struct CoherentCache<V: Send + Sync + 'static> {
  pub(crate) shared: Arc<CoherentShared<V>>,
}

impl<V: Send + Sync + 'static> Clone for CoherentCache<V> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

pub(crate) struct CoherentShared<V: Send + Sync> {
  pub(crate) flight: Arc<FillCoordinator<String, V>>,
  pub(crate) backend: Arc<dyn StoreBackend>,
  pub(crate) subs: SubscriptionManager,
  pub(crate) persistent: bool,
  pub(crate) key_prefix: String,
  pub(crate) update_prefix: String,
  pub(crate) default_age: Option<Duration>,
  pub(crate) metrics: Arc<Metrics>,
  pub(crate) listener: Mutex<Option<JoinHandle<()>>>,
}

impl<V: Send + Sync> Drop for CoherentShared<V> {
  fn drop(&mut self) {
    if let Some(listener) = self.listener.lock().take() {
      listener.abort();
    }
  }
}

impl<V: Send + Sync> CoherentShared<V> {
  /// The key under which an entry is persisted.
  pub(crate) fn store_key(&self, key: &str) -> String {
    format!("{}{}", self.key_prefix, key)
  }

  /// The invalidation channel carrying updates for `key`.
  pub(crate) fn channel_for(&self, key: &str) -> String {
    format!("{}{}", self.update_prefix, key)
  }
}

impl<V> CoherentShared<V>
where
  V: DeserializeOwned + Send + Sync + 'static,
{
  /// Starts the task that drains the backend's delivery stream.
  ///
  /// The task holds only a weak reference; it winds down on its own once
  /// every cache handle is gone.
  pub(crate) fn spawn_listener(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<Update>) {
    let weak = Arc::downgrade(self);
    let handle = tokio::spawn(async move {
      while let Some(update) = rx.recv().await {
        let Some(shared) = weak.upgrade() else {
          break;
        };
        shared.handle_update(update).await;
      }
      debug!("update listener stopped");
    });
    *self.listener.lock() = Some(handle);
  }

  /// Applies or ignores one incoming broadcast.
  pub(crate) async fn handle_update(&self, update: Update) {
    let Update { channel, payload } = update;
    let Some(key) = channel.strip_prefix(&self.update_prefix) else {
      warn!(channel, "broadcast on a channel outside the update namespace");
      return;
    };
    let key = key.to_owned();

    if self.flight.contains(&key) {
      match WireEnvelope::<V>::decode(&payload) {
        Ok(envelope) => {
          // Applied as a local write, never re-published: re-publishing
          // would loop the broadcast through every peer indefinitely.
          let ttl = envelope.ttl();
          self.flight.insert(key, envelope.data, ttl);
          self.metrics.broadcasts_applied.fetch_add(1, Ordering::Relaxed);
        }
        Err(error) => {
          // Fatal to this delivery only.
          warn!(%error, key, "dropping broadcast with malformed envelope");
        }
      }
    } else {
      // A broadcast for a key this process no longer caches.
      self.metrics.broadcasts_ignored.fetch_add(1, Ordering::Relaxed);
      if !self.subs.is_all_keys() {
        self.subs.untrack(&key);
        match self.backend.unsubscribe(&channel).await {
          Ok(()) => {
            self.metrics.unsubscribes.fetch_add(1, Ordering::Relaxed);
          }
          Err(error) => warn!(%error, channel, "unsubscribe failed"),
        }
      }
    }
  }
}

impl<V> CoherentCache<V>
where
  V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
  /// Retrieves a value, filling from the persistent store on a miss.
  ///
  /// Concurrent calls for the same missing key share a single store
  /// fetch. In per-key mode the key's update channel is subscribed before
  /// the fetch is issued; an update published in the window before the
  /// subscription takes effect can still be missed (accepted race).
  pub async fn get(&self, key: &str) -> Result<Option<Arc<V>>, CacheError> {
    if self.shared.subs.track(key) {
      let channel = self.shared.channel_for(key);
      let shared = Arc::clone(&self.shared);
      let key = key.to_owned();
      tokio::spawn(async move {
        if let Err(error) = shared.backend.subscribe(&channel).await {
          shared.subs.untrack(&key);
          warn!(%error, channel, "subscribe failed");
        }
      });
    }

    let shared = Arc::clone(&self.shared);
    let store_key = shared.store_key(key);
    let key = key.to_owned();
    self
      .shared
      .flight
      .get_or_fill(&key, move || async move {
        match shared.backend.fetch(&store_key).await {
          Ok(Some(bytes)) => {
            let envelope = WireEnvelope::<V>::decode(&bytes)?;
            Ok(Some(FillValue {
              ttl: envelope.ttl(),
              value: envelope.data,
            }))
          }
          Ok(None) => Ok(None),
          Err(error) => Err(error.into()),
        }
      })
      .await
  }

  /// Writes a value locally and, if persistence is enabled, persists and
  /// broadcasts it in the background.
  ///
  /// Returning means "accepted locally", not "durably persisted":
  /// persistence and publication are best-effort and never block the
  /// caller. One lifetime — `ttl`, falling back to the configured
  /// `default_age` — is resolved up front and applied to the local entry,
  /// the persisted record and the published envelope alike, so the local
  /// and remote copies cannot disagree about expiry. The wire carries
  /// whole seconds; a fractional lifetime rounds up to the next second
  /// there rather than down to "no expiry".
  pub fn insert(&self, key: &str, value: V, ttl: Option<Duration>) {
    let shared = &self.shared;
    let ttl = ttl.or(shared.default_age);

    let payload = if shared.persistent {
      match WireEnvelope::new(&value, ttl).encode() {
        Ok(payload) => Some(payload),
        Err(error) => {
          shared.metrics.persist_failures.fetch_add(1, Ordering::Relaxed);
          warn!(%error, key, "envelope encoding failed, write stays local");
          None
        }
      }
    } else {
      None
    };

    shared.flight.insert(key.to_owned(), value, ttl);
    debug!(key, "write accepted locally");

    if let Some(payload) = payload {
      let shared = Arc::clone(&self.shared);
      let store_key = shared.store_key(key);
      let channel = shared.channel_for(key);
      tokio::spawn(async move {
        if let Err(error) = shared.backend.store(&store_key, payload.clone(), ttl).await {
          shared.metrics.persist_failures.fetch_add(1, Ordering::Relaxed);
          warn!(%error, key = store_key.as_str(), "persist failed");
          return;
        }
        if let Err(error) = shared.backend.publish(&channel, payload).await {
          shared.metrics.persist_failures.fetch_add(1, Ordering::Relaxed);
          warn!(%error, channel = channel.as_str(), "publish failed");
        }
      });
    }
  }

  /// Removes the local entry, returning `true` if the key was present.
  ///
  /// Local only: peers are not notified, the persisted record is kept.
  /// In per-key mode the key's update channel is dropped as well.
  pub fn invalidate(&self, key: &str) -> bool {
    let removed = self.shared.flight.remove(&key.to_owned());
    if self.shared.subs.untrack(key) {
      let channel = self.shared.channel_for(key);
      let shared = Arc::clone(&self.shared);
      tokio::spawn(async move {
        match shared.backend.unsubscribe(&channel).await {
          Ok(()) => {
            shared.metrics.unsubscribes.fetch_add(1, Ordering::Relaxed);
          }
          Err(error) => warn!(%error, channel, "unsubscribe failed"),
        }
      });
    }
    removed
  }

  /// Reports whether a live entry for `key` is held locally.
  pub fn contains(&self, key: &str) -> bool {
    self.shared.flight.contains(&key.to_owned())
  }

  /// The number of entries held locally.
  pub fn len(&self) -> usize {
    self.shared.flight.len()
  }

  /// Returns `true` if no entries are held locally.
  pub fn is_empty(&self) -> bool {
    self.shared.flight.is_empty()
  }

  /// The subscription mode this cache was built with.
  pub fn subscription_mode(&self) -> crate::subscription::SubscriptionMode {
    self.shared.subs.mode()
  }

  /// A point-in-time snapshot of the cache's metrics.
  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }
}
