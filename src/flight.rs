//! Single-flight fill coordination.
//!
//! Deduplicates concurrent cache-miss fills per key: the first caller for
//! a missing key becomes the leader and spawns the filler exactly once;
//! every later caller for the same key joins the in-flight [`FillFuture`]
//! instead. All of them resolve with the same value or the same error.

use crate::error::CacheError;
use crate::metrics::Metrics;
use crate::recency::RecencyCache;

use std::collections::VecDeque;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use ahash::HashMap;
use parking_lot::Mutex;

/// The product of a successful filler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillValue<V> {
  pub value: V,
  /// Lifetime for the cached copy. Absent or zero means the value is
  /// delivered to waiters but not retained.
  pub ttl: Option<Duration>,
}

/// What every waiter of a fill eventually observes.
pub type FillOutcome<V> = Result<Option<Arc<V>>, CacheError>;

/// The internal state of a value being filled.
enum State<V> {
  Computing,
  Complete(FillOutcome<V>),
}

struct Inner<V> {
  state: State<V>,
  // Wakers in registration order. Waking schedules each waiter's task;
  // nothing user-visible runs synchronously inside `complete`.
  waiters: VecDeque<Waker>,
}

/// A future shared by every caller waiting on one in-flight fill.
///
/// At most one exists per key at any time; it is removed from the pending
/// map before completion is published.
pub(crate) struct FillFuture<V> {
  inner: Mutex<Inner<V>>,
}

impl<V> FillFuture<V> {
  fn new() -> Self {
    Self {
      inner: Mutex::new(Inner {
        state: State::Computing,
        waiters: VecDeque::new(),
      }),
    }
  }

  /// Publishes the outcome and wakes all waiters in registration order.
  fn complete(&self, outcome: FillOutcome<V>) {
    let mut inner = self.inner.lock();
    inner.state = State::Complete(outcome);
    for waiter in inner.waiters.drain(..) {
      waiter.wake();
    }
  }
}

impl<V> Future for &FillFuture<V> {
  type Output = FillOutcome<V>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let mut inner = self.inner.lock();
    match &inner.state {
      State::Complete(outcome) => Poll::Ready(outcome.clone()),
      State::Computing => {
        inner.waiters.push_back(cx.waker().clone());
        Poll::Pending
      }
    }
  }
}

/// The single-flight fill coordinator.
///
/// Owns the [`RecencyCache`] and the map of in-flight fills. The
/// coherence layer sits on top and only ever talks to this interface.
pub struct FillCoordinator<K: Send, V: Send> {
  cache: Mutex<RecencyCache<K, V>>,
  pending: Mutex<HashMap<K, Arc<FillFuture<V>>>>,
  metrics: Arc<Metrics>,
}

impl<K, V> FillCoordinator<K, V>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  /// Creates a coordinator over a recency cache bounded to `capacity`
  /// entries.
  pub fn new(capacity: usize) -> Self {
    Self::with_metrics(capacity, Arc::new(Metrics::new()))
  }

  /// The coherence layer shares one metrics collector across layers.
  pub(crate) fn with_metrics(capacity: usize, metrics: Arc<Metrics>) -> Self {
    Self {
      cache: Mutex::new(RecencyCache::new(capacity)),
      pending: Mutex::new(HashMap::default()),
      metrics,
    }
  }

  /// A point-in-time snapshot of the coordinator's metrics.
  pub fn metrics(&self) -> crate::metrics::MetricsSnapshot {
    self.metrics.snapshot()
  }

  /// Retrieves a cached value without consulting any filler.
  pub fn get(&self, key: &K) -> Option<Arc<V>> {
    let value = self.cache.lock().get(key);
    match &value {
      Some(_) => self.metrics.hits.fetch_add(1, Ordering::Relaxed),
      None => self.metrics.misses.fetch_add(1, Ordering::Relaxed),
    };
    value
  }

  /// Reports whether a live entry for `key` is held locally.
  pub fn contains(&self, key: &K) -> bool {
    self.cache.lock().contains(key)
  }

  /// Writes an entry directly, bypassing any in-flight fill.
  pub fn insert(&self, key: K, value: V, ttl: Option<Duration>) {
    self.cache.lock().insert(key, value, ttl);
    self.metrics.inserts.fetch_add(1, Ordering::Relaxed);
  }

  /// Removes an entry, returning `true` if the key was present.
  pub fn remove(&self, key: &K) -> bool {
    let removed = self.cache.lock().remove(key);
    if removed {
      self.metrics.invalidations.fetch_add(1, Ordering::Relaxed);
    }
    removed
  }

  /// The number of entries currently held locally.
  pub fn len(&self) -> usize {
    self.cache.lock().len()
  }

  /// Returns `true` if no entries are held locally.
  pub fn is_empty(&self) -> bool {
    self.cache.lock().is_empty()
  }

  /// Retrieves `key`, invoking `filler` at most once across all concurrent
  /// callers if it is absent.
  ///
  /// A hit returns without suspension. On a miss the caller either joins
  /// an existing in-flight fill or becomes the leader that spawns the
  /// filler; every waiter then resolves with the same outcome. A filler
  /// result with a positive ttl populates the cache; one without is
  /// delivered but not retained.
  ///
  /// There is no internal timeout: a filler that never settles blocks its
  /// waiters indefinitely.
  pub async fn get_or_fill<F, Fut>(self: &Arc<Self>, key: &K, filler: F) -> FillOutcome<V>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<FillValue<V>>, CacheError>> + Send + 'static,
  {
    // 1. Optimistic read.
    if let Some(value) = self.cache.lock().get(key) {
      self.metrics.hits.fetch_add(1, Ordering::Relaxed);
      return Ok(Some(value));
    }

    let future = {
      let mut pending = self.pending.lock();

      // 2. Double-check the cache under the pending lock: a fill may have
      //    completed between step 1 and here.
      if let Some(value) = self.cache.lock().get(key) {
        self.metrics.hits.fetch_add(1, Ordering::Relaxed);
        return Ok(Some(value));
      }

      // 3. Join an existing in-flight fill. Counts as a hit: the filler
      //    is not invoked on our behalf.
      if let Some(existing) = pending.get(key) {
        self.metrics.hits.fetch_add(1, Ordering::Relaxed);
        existing.clone()
      } else {
        // 4. We are the leader. The only path that records a miss and
        //    invokes the filler.
        self.metrics.misses.fetch_add(1, Ordering::Relaxed);
        self.metrics.fills.fetch_add(1, Ordering::Relaxed);

        let future = Arc::new(FillFuture::new());
        pending.insert(key.clone(), future.clone());
        Self::spawn_fill(Arc::clone(self), key.clone(), filler(), future.clone());
        future
      }
    }; // pending lock released before suspending.

    // 5. Leader and joiners alike await the shared future.
    (&*future).await
  }

  /// Drives one filler to completion and fans its outcome out.
  ///
  /// The pending entry is removed before the future completes, in every
  /// path, so a follow-up miss always starts a fresh fill.
  fn spawn_fill<Fut>(this: Arc<Self>, key: K, filler: Fut, future: Arc<FillFuture<V>>)
  where
    Fut: Future<Output = Result<Option<FillValue<V>>, CacheError>> + Send + 'static,
  {
    tokio::spawn(async move {
      let outcome = match filler.await {
        Ok(Some(FillValue { value, ttl })) => {
          let shared = Arc::new(value);
          match ttl {
            Some(ttl) if !ttl.is_zero() => {
              this.cache.lock().insert_shared(key.clone(), shared.clone(), Some(ttl));
              this.metrics.inserts.fetch_add(1, Ordering::Relaxed);
            }
            // Absent or non-positive ttl: deliver without caching.
            _ => {}
          }
          Ok(Some(shared))
        }
        Ok(None) => Ok(None),
        Err(error) => {
          this.metrics.fill_errors.fetch_add(1, Ordering::Relaxed);
          Err(error)
        }
      };

      this.pending.lock().remove(&key);
      future.complete(outcome);
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::task::Wake;

  // A waker that records which waiter it belongs to when fired.
  struct Recorder {
    id: usize,
    log: Arc<Mutex<Vec<usize>>>,
  }

  impl Wake for Recorder {
    fn wake(self: Arc<Self>) {
      self.log.lock().push(self.id);
    }
  }

  fn poll_once<V>(future: &FillFuture<V>, waker: &Waker) -> Poll<FillOutcome<V>> {
    let mut cx = Context::from_waker(waker);
    let mut handle = future;
    Pin::new(&mut handle).poll(&mut cx)
  }

  #[test]
  fn completion_wakes_waiters_in_registration_order() {
    let future = FillFuture::<i32>::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let wakers: Vec<Waker> = (0..5)
      .map(|id| {
        Waker::from(Arc::new(Recorder {
          id,
          log: log.clone(),
        }))
      })
      .collect();
    for waker in &wakers {
      assert!(poll_once(&future, waker).is_pending());
    }

    future.complete(Ok(Some(Arc::new(9))));
    assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
  }

  #[test]
  fn late_pollers_observe_the_outcome_without_registering() {
    let future = FillFuture::<i32>::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    future.complete(Ok(None));

    let waker = Waker::from(Arc::new(Recorder {
      id: 7,
      log: log.clone(),
    }));
    match poll_once(&future, &waker) {
      Poll::Ready(Ok(None)) => {}
      other => panic!("expected a ready absent outcome, got {:?}", other.map(|r| r.is_ok())),
    }
    assert!(log.lock().is_empty(), "a settled future must not hold wakers");
  }
}
