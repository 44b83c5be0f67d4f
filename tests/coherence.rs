//! End-to-end coherence protocol tests: several cache instances connected
//! to one in-process hub, standing in for several processes sharing one
//! store.

use stampede::backend::memory::{MemoryHub, MemoryStore};
use stampede::backend::StoreBackend;
use stampede::{CacheBuilder, CoherentCache, WireEnvelope};

use std::time::Duration;
use tokio::time::sleep;

fn per_key_cache(hub: &MemoryHub) -> CoherentCache<String> {
  CacheBuilder::new()
    .capacity(64)
    .backend(hub.connect())
    .build()
    .unwrap()
}

async fn seed(conn: &MemoryStore, key: &str, value: &str, ttl: Option<Duration>) {
  let payload = WireEnvelope::new(value.to_string(), ttl).encode().unwrap();
  conn.store(key, payload, ttl).await.unwrap();
}

// Background persist/publish/subscribe tasks need a moment to land.
async fn settle() {
  sleep(Duration::from_millis(30)).await;
}

#[tokio::test]
async fn peers_read_each_others_writes_through_the_store() {
  let hub = MemoryHub::new();
  let a = per_key_cache(&hub);
  let b = per_key_cache(&hub);

  a.insert("user:1", "v1".to_string(), Some(Duration::from_secs(60)));
  settle().await;

  let value = b.get("user:1").await.unwrap();
  assert_eq!(value.as_deref().map(String::as_str), Some("v1"));
  assert_eq!(b.metrics().fills, 1);

  // Now cached locally on b.
  let value = b.get("user:1").await.unwrap();
  assert_eq!(value.as_deref().map(String::as_str), Some("v1"));
  assert_eq!(b.metrics().fills, 1, "second read must be a local hit");
}

#[tokio::test]
async fn broadcast_updates_caching_peer_without_republishing() {
  let hub = MemoryHub::new();
  let raw = hub.connect();
  let a = per_key_cache(&hub);
  let b = per_key_cache(&hub);

  seed(&raw, "user:1", "v1", Some(Duration::from_secs(60))).await;
  let value = b.get("user:1").await.unwrap();
  assert_eq!(value.as_deref().map(String::as_str), Some("v1"));
  settle().await;

  // An independent observer counts publications on the key's channel.
  let observer = hub.connect();
  observer.subscribe("update:user:1").await.unwrap();
  let mut observed = observer.take_updates().unwrap();

  a.insert("user:1", "v2".to_string(), Some(Duration::from_secs(60)));
  settle().await;

  let value = b.get("user:1").await.unwrap();
  assert_eq!(value.as_deref().map(String::as_str), Some("v2"));
  assert_eq!(b.metrics().fills, 1, "the update must arrive by broadcast, not refetch");
  assert_eq!(b.metrics().broadcasts_applied, 1);

  // Exactly one publication: a's. If b re-published the applied
  // broadcast, the observer would see a second one.
  assert!(observed.try_recv().is_ok());
  assert!(observed.try_recv().is_err(), "broadcast was re-published");
}

#[tokio::test]
async fn broadcast_for_uncached_key_is_ignored_and_unsubscribes() {
  let hub = MemoryHub::new();
  let a = per_key_cache(&hub);
  let b = per_key_cache(&hub);

  // b asks for a key nobody has written: not cached, but its channel is
  // now subscribed.
  assert!(b.get("ghost").await.unwrap().is_none());
  settle().await;
  assert_eq!(hub.subscriber_count("update:ghost"), 1);

  a.insert("ghost", "v".to_string(), Some(Duration::from_secs(60)));
  settle().await;

  assert!(!b.contains("ghost"));
  assert_eq!(b.metrics().broadcasts_applied, 0);
  assert_eq!(b.metrics().broadcasts_ignored, 1);
  assert_eq!(b.metrics().unsubscribes, 1);
  assert_eq!(hub.subscriber_count("update:ghost"), 0);
}

#[tokio::test]
async fn key_prefix_namespaces_storage_and_derives_all_keys_mode() {
  let hub = MemoryHub::new();
  let raw = hub.connect();
  let build = || {
    CacheBuilder::new()
      .capacity(64)
      .key_prefix("app:")
      .backend(hub.connect())
      .build()
      .unwrap()
  };
  let a: CoherentCache<String> = build();
  let b: CoherentCache<String> = build();
  settle().await;

  // b hears this over its wildcard subscription but does not cache the
  // key yet, so the broadcast is ignored.
  a.insert("cfg", "v1".to_string(), Some(Duration::from_secs(60)));
  settle().await;

  // Persisted under the namespaced key.
  let bytes = raw.fetch("app:cfg").await.unwrap().expect("persisted");
  let envelope = WireEnvelope::<String>::decode(&bytes).unwrap();
  assert_eq!(envelope.data, "v1");
  assert_eq!(envelope.age, Some(60));

  assert_eq!(
    b.get("cfg").await.unwrap().as_deref().map(String::as_str),
    Some("v1")
  );

  // b caches "cfg", so a's next write reaches it over the wildcard
  // subscription.
  a.insert("cfg", "v2".to_string(), Some(Duration::from_secs(60)));
  settle().await;
  assert_eq!(
    b.get("cfg").await.unwrap().as_deref().map(String::as_str),
    Some("v2")
  );
  assert_eq!(b.metrics().fills, 1);

  // A broadcast for a key b does not cache is ignored, with no
  // per-key unsubscribe in all-keys mode.
  a.insert("other", "x".to_string(), Some(Duration::from_secs(60)));
  settle().await;
  assert!(!b.contains("other"));
  assert_eq!(b.metrics().broadcasts_applied, 1);
  assert_eq!(b.metrics().broadcasts_ignored, 2);
  assert_eq!(b.metrics().unsubscribes, 0);
}

#[tokio::test]
async fn malformed_broadcast_is_dropped_not_applied() {
  let hub = MemoryHub::new();
  let raw = hub.connect();
  let b = per_key_cache(&hub);

  seed(&raw, "user:1", "v1", Some(Duration::from_secs(60))).await;
  assert!(b.get("user:1").await.unwrap().is_some());
  settle().await;

  raw
    .publish("update:user:1", b"\xffnot an envelope".to_vec())
    .await
    .unwrap();
  settle().await;

  assert_eq!(
    b.get("user:1").await.unwrap().as_deref().map(String::as_str),
    Some("v1"),
    "a malformed envelope must not clobber the cached value"
  );
  assert_eq!(b.metrics().broadcasts_applied, 0);
}

#[tokio::test]
async fn non_persistent_writes_stay_local() {
  let hub = MemoryHub::new();
  let a: CoherentCache<String> = CacheBuilder::new()
    .capacity(64)
    .persistent(false)
    .backend(hub.connect())
    .build()
    .unwrap();
  let b = per_key_cache(&hub);

  a.insert("k", "v".to_string(), Some(Duration::from_secs(60)));
  settle().await;

  assert!(a.contains("k"));
  assert_eq!(hub.persisted_len(), 0);
  assert!(b.get("k").await.unwrap().is_none());
}

#[tokio::test]
async fn default_age_applies_to_local_and_persisted_copies() {
  let hub = MemoryHub::new();
  let raw = hub.connect();
  let a: CoherentCache<String> = CacheBuilder::new()
    .capacity(64)
    .default_age(Duration::from_secs(1))
    .backend(hub.connect())
    .build()
    .unwrap();
  let b = per_key_cache(&hub);

  // No explicit ttl: both sides run on the same resolved default.
  a.insert("k", "v".to_string(), None);
  settle().await;

  assert!(a.contains("k"));
  let bytes = raw.fetch("k").await.unwrap().expect("persisted");
  assert_eq!(WireEnvelope::<String>::decode(&bytes).unwrap().age, Some(1));

  sleep(Duration::from_millis(1200)).await;
  assert!(!a.contains("k"), "local copy must expire with the default age");
  assert!(
    b.get("k").await.unwrap().is_none(),
    "persisted copy must expire with the same age"
  );
}

#[tokio::test]
async fn invalidate_is_local_and_drops_the_subscription() {
  let hub = MemoryHub::new();
  let raw = hub.connect();
  let b = per_key_cache(&hub);

  seed(&raw, "k", "v", Some(Duration::from_secs(60))).await;
  assert!(b.get("k").await.unwrap().is_some());
  settle().await;
  assert_eq!(hub.subscriber_count("update:k"), 1);

  assert!(b.invalidate("k"));
  assert!(!b.contains("k"));
  settle().await;
  assert_eq!(hub.subscriber_count("update:k"), 0);

  // The persisted record survives; the next read refills from the store.
  assert!(b.get("k").await.unwrap().is_some());
  assert_eq!(b.metrics().fills, 2);
}
