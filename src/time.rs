use once_cell::sync::Lazy;
use std::time::{Duration, Instant};

// The single, static reference point for all expiry arithmetic.
// Initialized lazily on first use.
static CACHE_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// The current time as nanoseconds since the cache epoch.
#[inline]
pub(crate) fn now_nanos() -> u64 {
  Instant::now().saturating_duration_since(*CACHE_EPOCH).as_nanos() as u64
}

/// Converts a ttl into an absolute deadline in epoch nanoseconds,
/// saturating for lifetimes beyond the representable range.
/// A deadline of 0 is reserved to mean "no expiry".
#[inline]
pub(crate) fn deadline_after(ttl: Duration) -> u64 {
  let ttl_nanos = u64::try_from(ttl.as_nanos()).unwrap_or(u64::MAX);
  now_nanos().saturating_add(ttl_nanos)
}
