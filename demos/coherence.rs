use stampede::backend::memory::MemoryHub;
use stampede::{CacheBuilder, CoherentCache};

use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use tokio::time::{sleep, Duration};

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_env_filter("stampede=debug")
    .init();

  // Two cache instances over one hub stand in for two processes sharing
  // one persistent store.
  let hub = MemoryHub::new();
  let build = || -> CoherentCache<String> {
    CacheBuilder::new()
      .capacity(1024)
      .backend(hub.connect())
      .build()
      .expect("failed to build cache")
  };
  let writer = build();
  let reader = build();

  println!("--- Thundering Herd Demonstration ---");
  writer.insert("user:42", "alice".into(), Some(Duration::from_secs(60)));
  sleep(Duration::from_millis(10)).await;

  let fetches = Arc::new(AtomicUsize::new(0));
  let mut tasks = vec![];
  for i in 0..10 {
    let reader = reader.clone();
    let fetches = fetches.clone();
    tasks.push(tokio::spawn(async move {
      let before = reader.metrics().fills;
      let value = reader.get("user:42").await.expect("get failed");
      if reader.metrics().fills > before {
        fetches.fetch_add(1, Ordering::SeqCst);
      }
      println!("task {i}: got {:?}", value.as_deref());
    }));
  }
  for task in tasks {
    task.await.unwrap();
  }
  println!(
    "store fetches observed: {} (metrics say {})\n",
    fetches.load(Ordering::SeqCst),
    reader.metrics().fills
  );

  println!("--- Coherence Demonstration ---");
  writer.insert("user:42", "alice v2".into(), Some(Duration::from_secs(60)));
  sleep(Duration::from_millis(20)).await;

  // The reader picked the update up over pub/sub, no refetch involved.
  let value = reader.get("user:42").await.expect("get failed");
  println!(
    "reader now sees {:?} after {} broadcast(s), still {} store fetch(es)",
    value.as_deref(),
    reader.metrics().broadcasts_applied,
    reader.metrics().fills
  );
}
