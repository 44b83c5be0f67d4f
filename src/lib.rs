//! A bounded in-memory cache with dogpile protection and cross-process
//! coherence.
//!
//! # Features
//! - **Single-flight fills**: concurrent misses for one key share exactly
//!   one backing fetch; every waiter gets the same value or error.
//! - **Coherence**: writes are persisted to a shared key-value store and
//!   broadcast over its publish/subscribe channels; peers apply an update
//!   only while they cache the key (or run in all-keys mode).
//! - **Bounded recency**: an LRU map with optional per-entry expiry keeps
//!   the local footprint fixed.
//! - **Pluggable store**: anything with `GET`/`SET..EX`/`PUBLISH`/
//!   `SUBSCRIBE` fits behind [`StoreBackend`]; an in-process
//!   [`backend::memory`] hub ships for tests and demos.
//! - **Observability**: detailed metrics plus `tracing` events on the
//!   best-effort write path.
//!
//! Coherence is best-effort: there is no global linearizability and an
//! update may be missed; peers converge through expiry and refills.

// Public modules that form the API
pub mod backend;
pub mod builder;
pub mod envelope;
pub mod error;
pub mod flight;
pub mod metrics;
pub mod recency;
pub mod subscription;

// Internal, crate-only modules
mod coherent;
mod entry;
mod time;

// Re-export the primary user-facing types for convenience
pub use backend::{StoreBackend, Update};
pub use builder::CacheBuilder;
pub use coherent::CoherentCache;
pub use envelope::WireEnvelope;
pub use error::{BuildError, CacheError, StoreError};
pub use flight::{FillCoordinator, FillValue};
pub use metrics::MetricsSnapshot;
pub use recency::RecencyCache;
pub use subscription::SubscriptionMode;
