use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A thread-safe, internal metrics collector for the cache.
/// All fields are atomic to allow for lock-free updates.
#[derive(Debug)]
pub struct Metrics {
  // --- Hit/Miss Ratios ---
  pub(crate) hits: AtomicU64,
  pub(crate) misses: AtomicU64,

  // --- Fill Coordination ---
  pub(crate) fills: AtomicU64,
  pub(crate) fill_errors: AtomicU64,

  // --- Throughput ---
  pub(crate) inserts: AtomicU64,
  pub(crate) invalidations: AtomicU64,

  // --- Coherence ---
  pub(crate) broadcasts_applied: AtomicU64,
  pub(crate) broadcasts_ignored: AtomicU64,
  pub(crate) unsubscribes: AtomicU64,
  pub(crate) persist_failures: AtomicU64,

  created_at: Instant,
}

// Manual implementation of Default to handle the non-default `Instant`.
impl Default for Metrics {
  fn default() -> Self {
    Self {
      hits: AtomicU64::new(0),
      misses: AtomicU64::new(0),
      fills: AtomicU64::new(0),
      fill_errors: AtomicU64::new(0),
      inserts: AtomicU64::new(0),
      invalidations: AtomicU64::new(0),
      broadcasts_applied: AtomicU64::new(0),
      broadcasts_ignored: AtomicU64::new(0),
      unsubscribes: AtomicU64::new(0),
      persist_failures: AtomicU64::new(0),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Creates a point-in-time snapshot of the current metrics.
  pub(crate) fn snapshot(&self) -> MetricsSnapshot {
    let hits = self.hits.load(Ordering::Relaxed);
    let misses = self.misses.load(Ordering::Relaxed);
    let total_lookups = hits + misses;

    MetricsSnapshot {
      hits,
      misses,
      hit_ratio: if total_lookups == 0 {
        0.0
      } else {
        hits as f64 / total_lookups as f64
      },
      fills: self.fills.load(Ordering::Relaxed),
      fill_errors: self.fill_errors.load(Ordering::Relaxed),
      inserts: self.inserts.load(Ordering::Relaxed),
      invalidations: self.invalidations.load(Ordering::Relaxed),
      broadcasts_applied: self.broadcasts_applied.load(Ordering::Relaxed),
      broadcasts_ignored: self.broadcasts_ignored.load(Ordering::Relaxed),
      unsubscribes: self.unsubscribes.load(Ordering::Relaxed),
      persist_failures: self.persist_failures.load(Ordering::Relaxed),
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, public-facing snapshot of the cache's metrics.
#[derive(Clone)]
pub struct MetricsSnapshot {
  /// The number of lookups served from the local cache (fill joiners
  /// included, since the filler did not run on their behalf).
  pub hits: u64,
  /// The number of lookups that led a fill.
  pub misses: u64,
  /// The cache hit ratio (hits / (hits + misses)).
  pub hit_ratio: f64,
  /// The number of filler invocations.
  pub fills: u64,
  /// The number of filler invocations that failed.
  pub fill_errors: u64,
  /// The total number of items written into the local cache.
  pub inserts: u64,
  /// The total number of manual invalidations.
  pub invalidations: u64,
  /// Broadcasts applied as local writes.
  pub broadcasts_applied: u64,
  /// Broadcasts ignored because the key was not cached locally.
  pub broadcasts_ignored: u64,
  /// Per-key channels dropped after an irrelevant broadcast or an
  /// invalidation.
  pub unsubscribes: u64,
  /// Best-effort persistence or publish attempts that failed.
  pub persist_failures: u64,
  /// The number of seconds the cache has been running.
  pub uptime_secs: u64,
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("hits", &self.hits)
      .field("misses", &self.misses)
      .field("hit_ratio", &format!("{:.2}%", self.hit_ratio * 100.0))
      .field("fills", &self.fills)
      .field("fill_errors", &self.fill_errors)
      .field("inserts", &self.inserts)
      .field("invalidations", &self.invalidations)
      .field("broadcasts_applied", &self.broadcasts_applied)
      .field("broadcasts_ignored", &self.broadcasts_ignored)
      .field("unsubscribes", &self.unsubscribes)
      .field("persist_failures", &self.persist_failures)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
