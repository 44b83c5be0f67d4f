use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Errors that can occur when building a cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
  /// The cache was configured with a capacity of zero, which is not allowed
  /// for a bounded cache. Use `unbounded()` for an unbounded cache.
  ZeroCapacity,
  /// No store backend was provided.
  BackendRequired,
  /// The backend's update stream was already taken, so it cannot feed
  /// another cache.
  BackendExhausted,
}

impl fmt::Display for BuildError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BuildError::ZeroCapacity => write!(f, "bounded cache capacity cannot be zero"),
      BuildError::BackendRequired => write!(f, "a store backend is required"),
      BuildError::BackendExhausted => {
        write!(f, "the backend's update stream was already taken")
      }
    }
  }
}

impl std::error::Error for BuildError {}

/// Errors surfaced by the store backend.
#[derive(Debug, Error)]
pub enum StoreError {
  /// The backend connection has been shut down.
  #[error("store connection closed")]
  Closed,
  /// The backend reported a transport-level failure.
  #[error("store connection failed: {0}")]
  Connection(String),
}

/// Errors surfaced by cache reads.
///
/// `CacheError` is `Clone` (sources are `Arc`-wrapped) because a single
/// failed fill is fanned out to every waiter that joined it.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
  /// The backing store fetch failed. Every waiter of the corresponding
  /// in-flight fill receives this same error.
  #[error("backing store fetch failed")]
  Store(#[from] Arc<StoreError>),
  /// A wire envelope could not be decoded. Fatal to the single read or
  /// broadcast that carried it, nothing else.
  #[error("malformed wire envelope")]
  Codec(#[from] Arc<serde_json::Error>),
}

impl From<StoreError> for CacheError {
  fn from(err: StoreError) -> Self {
    CacheError::Store(Arc::new(err))
  }
}

impl From<serde_json::Error> for CacheError {
  fn from(err: serde_json::Error) -> Self {
    CacheError::Codec(Arc::new(err))
  }
}
