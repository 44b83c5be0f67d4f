//! The serialized form exchanged with the persistent store and over the
//! invalidation channel.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// The persisted/published form of a cache entry: the value plus its
/// remaining lifetime in seconds. `age` absent or zero means "no expiry".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEnvelope<V> {
  pub data: V,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub age: Option<u64>,
}

impl<V> WireEnvelope<V> {
  pub fn new(data: V, age: Option<Duration>) -> Self {
    Self {
      data,
      // The wire carries whole seconds; fractional lifetimes round up so
      // a finite ttl never encodes as 0, which readers treat as
      // "no expiry".
      age: age.map(|age| {
        if age.subsec_nanos() > 0 {
          age.as_secs().saturating_add(1)
        } else {
          age.as_secs()
        }
      }),
    }
  }

  /// The envelope's lifetime as a `Duration`, with zero normalized to
  /// "no expiry".
  pub fn ttl(&self) -> Option<Duration> {
    match self.age {
      Some(secs) if secs > 0 => Some(Duration::from_secs(secs)),
      _ => None,
    }
  }
}

impl<V: Serialize> WireEnvelope<V> {
  pub fn encode(&self) -> Result<Vec<u8>, CacheError> {
    Ok(serde_json::to_vec(self)?)
  }
}

impl<V: DeserializeOwned> WireEnvelope<V> {
  pub fn decode(bytes: &[u8]) -> Result<Self, CacheError> {
    Ok(serde_json::from_slice(bytes)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Profile {
    name: String,
    logins: u32,
    tags: Vec<String>,
  }

  #[test]
  fn round_trips_structured_values() {
    let envelope = WireEnvelope::new(
      Profile {
        name: "ada".into(),
        logins: 3,
        tags: vec!["admin".into(), "beta".into()],
      },
      Some(Duration::from_secs(60)),
    );
    let decoded = WireEnvelope::<Profile>::decode(&envelope.encode().unwrap()).unwrap();
    assert_eq!(decoded, envelope);
    assert_eq!(decoded.ttl(), Some(Duration::from_secs(60)));
  }

  #[test]
  fn missing_age_means_no_expiry() {
    let decoded = WireEnvelope::<String>::decode(br#"{"data":"v"}"#).unwrap();
    assert_eq!(decoded.data, "v");
    assert_eq!(decoded.age, None);
    assert_eq!(decoded.ttl(), None);
  }

  #[test]
  fn subsecond_lifetimes_round_up_to_one_second() {
    // A 500 ms write must not broadcast age 0: a peer would cache it
    // without expiry.
    let envelope = WireEnvelope::new("v".to_string(), Some(Duration::from_millis(500)));
    assert_eq!(envelope.age, Some(1));
    assert_eq!(envelope.ttl(), Some(Duration::from_secs(1)));

    let envelope = WireEnvelope::new("v".to_string(), Some(Duration::from_millis(2500)));
    assert_eq!(envelope.age, Some(3));
  }

  #[test]
  fn zero_age_means_no_expiry() {
    let envelope = WireEnvelope::new("v".to_string(), Some(Duration::ZERO));
    assert_eq!(envelope.ttl(), None);
  }

  #[test]
  fn garbage_is_a_codec_error() {
    let err = WireEnvelope::<String>::decode(b"\xff not json").unwrap_err();
    assert!(matches!(err, CacheError::Codec(_)));
  }
}
