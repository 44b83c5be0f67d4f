//! The persistent-store boundary.
//!
//! Any key-value store with per-key expiry and publish/subscribe satisfies
//! this trait; the coherence layer never sees anything narrower than it.
//! [`memory`] provides an in-process implementation used by tests and
//! demos.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use crate::error::StoreError;

/// One publish/subscribe delivery: the channel it arrived on and the raw
/// payload.
#[derive(Debug, Clone)]
pub struct Update {
  pub channel: String,
  pub payload: Vec<u8>,
}

/// A key-value store with expiry and publish/subscribe.
///
/// Persisted values and published payloads are opaque bytes; encoding is
/// the caller's concern. Subscriptions feed the receiver handed out by
/// [`take_updates`](Self::take_updates).
#[async_trait]
pub trait StoreBackend: Send + Sync + 'static {
  /// `GET key` — the stored bytes, or `None` if absent or expired.
  async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

  /// `SET key bytes [EX seconds]`.
  async fn store(&self, key: &str, payload: Vec<u8>, expire: Option<Duration>)
    -> Result<(), StoreError>;

  /// `PUBLISH channel bytes` — fan out to every current subscriber.
  async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), StoreError>;

  /// `SUBSCRIBE channel`.
  async fn subscribe(&self, channel: &str) -> Result<(), StoreError>;

  /// `PSUBSCRIBE pattern` — `*` matches any run of characters.
  async fn subscribe_pattern(&self, pattern: &str) -> Result<(), StoreError>;

  /// `UNSUBSCRIBE channel`.
  async fn unsubscribe(&self, channel: &str) -> Result<(), StoreError>;

  /// The delivery stream for this connection's subscriptions. Yields the
  /// receiver once; later calls return `None`.
  fn take_updates(&self) -> Option<mpsc::UnboundedReceiver<Update>>;
}
