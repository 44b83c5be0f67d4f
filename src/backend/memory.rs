//! An in-process store backend.
//!
//! A [`MemoryHub`] plays the role of the shared server: one key space with
//! lazy expiry plus a pub/sub broker. Each [`MemoryStore`] connected to it
//! behaves like one client connection with its own subscription set, which
//! lets a test run several cache instances against the same "store" and
//! exercise the coherence protocol end to end.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{StoreBackend, StoreError, Update};

struct StoredValue {
  payload: Vec<u8>,
  expires_at: Option<Instant>,
}

struct Connection {
  channels: HashSet<String>,
  patterns: HashSet<String>,
  tx: mpsc::UnboundedSender<Update>,
}

#[derive(Default)]
struct HubInner {
  entries: HashMap<String, StoredValue>,
  connections: HashMap<u64, Connection>,
  next_conn_id: u64,
}

/// The shared key space and pub/sub broker.
#[derive(Clone, Default)]
pub struct MemoryHub {
  inner: Arc<Mutex<HubInner>>,
}

impl MemoryHub {
  pub fn new() -> Self {
    Self::default()
  }

  /// Opens a new connection against this hub.
  pub fn connect(&self) -> MemoryStore {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut inner = self.inner.lock();
    let id = inner.next_conn_id;
    inner.next_conn_id += 1;
    inner.connections.insert(
      id,
      Connection {
        channels: HashSet::new(),
        patterns: HashSet::new(),
        tx,
      },
    );
    MemoryStore {
      inner: self.inner.clone(),
      conn_id: id,
      updates: Mutex::new(Some(rx)),
    }
  }

  /// The number of connections holding an exact subscription to
  /// `channel`. Test helper.
  pub fn subscriber_count(&self, channel: &str) -> usize {
    self
      .inner
      .lock()
      .connections
      .values()
      .filter(|c| c.channels.contains(channel))
      .count()
  }

  /// The number of live (non-expired) persisted keys. Test helper.
  pub fn persisted_len(&self) -> usize {
    let now = Instant::now();
    self
      .inner
      .lock()
      .entries
      .values()
      .filter(|v| v.expires_at.is_none_or(|at| at > now))
      .count()
  }
}

/// One client connection to a [`MemoryHub`].
pub struct MemoryStore {
  inner: Arc<Mutex<HubInner>>,
  conn_id: u64,
  updates: Mutex<Option<mpsc::UnboundedReceiver<Update>>>,
}

impl MemoryStore {
  /// The channels this connection is currently subscribed to (exact
  /// subscriptions only). Test helper.
  pub fn subscribed_channels(&self) -> Vec<String> {
    let inner = self.inner.lock();
    inner
      .connections
      .get(&self.conn_id)
      .map(|c| c.channels.iter().cloned().collect())
      .unwrap_or_default()
  }
}

impl Drop for MemoryStore {
  fn drop(&mut self) {
    self.inner.lock().connections.remove(&self.conn_id);
  }
}

/// Glob match where `*` stands for any run of characters.
fn pattern_matches(pattern: &str, channel: &str) -> bool {
  match pattern.split_once('*') {
    Some((prefix, suffix)) => {
      channel.len() >= prefix.len() + suffix.len()
        && channel.starts_with(prefix)
        && channel.ends_with(suffix)
    }
    None => pattern == channel,
  }
}

#[async_trait]
impl StoreBackend for MemoryStore {
  async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
    let mut inner = self.inner.lock();
    // Lazy expiry, as a real store with EX semantics would do.
    if let Some(value) = inner.entries.get(key) {
      if value.expires_at.is_some_and(|at| at <= Instant::now()) {
        inner.entries.remove(key);
        return Ok(None);
      }
    }
    Ok(inner.entries.get(key).map(|v| v.payload.clone()))
  }

  async fn store(
    &self,
    key: &str,
    payload: Vec<u8>,
    expire: Option<Duration>,
  ) -> Result<(), StoreError> {
    let mut inner = self.inner.lock();
    inner.entries.insert(
      key.to_owned(),
      StoredValue {
        payload,
        expires_at: expire.map(|ttl| Instant::now() + ttl),
      },
    );
    Ok(())
  }

  async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), StoreError> {
    let inner = self.inner.lock();
    for conn in inner.connections.values() {
      let interested = conn.channels.contains(channel)
        || conn.patterns.iter().any(|p| pattern_matches(p, channel));
      if interested {
        // A receiver dropped mid-delivery is that connection's problem.
        let _ = conn.tx.send(Update {
          channel: channel.to_owned(),
          payload: payload.clone(),
        });
      }
    }
    Ok(())
  }

  async fn subscribe(&self, channel: &str) -> Result<(), StoreError> {
    let mut inner = self.inner.lock();
    let conn = inner
      .connections
      .get_mut(&self.conn_id)
      .ok_or(StoreError::Closed)?;
    conn.channels.insert(channel.to_owned());
    Ok(())
  }

  async fn subscribe_pattern(&self, pattern: &str) -> Result<(), StoreError> {
    let mut inner = self.inner.lock();
    let conn = inner
      .connections
      .get_mut(&self.conn_id)
      .ok_or(StoreError::Closed)?;
    conn.patterns.insert(pattern.to_owned());
    Ok(())
  }

  async fn unsubscribe(&self, channel: &str) -> Result<(), StoreError> {
    let mut inner = self.inner.lock();
    let conn = inner
      .connections
      .get_mut(&self.conn_id)
      .ok_or(StoreError::Closed)?;
    conn.channels.remove(channel);
    Ok(())
  }

  fn take_updates(&self) -> Option<mpsc::UnboundedReceiver<Update>> {
    self.updates.lock().take()
  }
}
