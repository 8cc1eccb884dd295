use std::time::Duration;

use tonic::metadata::{Ascii, KeyAndValueRef, MetadataKey, MetadataMap, MetadataValue};

use crate::retry::RetryPolicy;

/// Immutable per-call configuration: timeout, retry policy, extra metadata.
///
/// Options compose by right-biased merge: `a.merge(&b)` keeps `b`'s timeout
/// and retry policy wherever `b` sets them, and appends `b`'s metadata after
/// `a`'s. A `ClientCall` configured with options stays reusable; applying
/// options and applying the request are independent steps.
///
/// ## Example
/// ```ignore
/// use grpc_reactive::{CallOptions, RetryPolicy};
/// use std::time::Duration;
/// use tonic::Code;
///
/// let options = CallOptions::new()
///     .with_timeout(Duration::from_millis(500))
///     .with_retry(RetryPolicy::fixed(3, Duration::from_millis(50), &[Code::Unavailable]))
///     .with_metadata("authorization", "Bearer token");
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
  pub timeout: Option<Duration>,
  pub retry: Option<RetryPolicy>,
  pub metadata: MetadataMap,
}

impl CallOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
    self.retry = Some(policy);
    self
  }

  /// Append one outgoing metadata entry. Invalid (non-ASCII) keys or values
  /// are dropped with a warning.
  pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
    append_metadata(&mut self.metadata, key, value);
    self
  }

  /// Right-biased merge: fields set in `other` win, metadata is unioned with
  /// `other`'s entries appended last.
  pub fn merge(&self, other: &CallOptions) -> CallOptions {
    let mut metadata = self.metadata.clone();
    merge_metadata(&mut metadata, &other.metadata);
    CallOptions {
      timeout: other.timeout.or(self.timeout),
      retry: other.retry.clone().or_else(|| self.retry.clone()),
      metadata,
    }
  }
}

pub(crate) fn append_metadata(target: &mut MetadataMap, key: &str, value: &str) {
  match (
    key.parse::<MetadataKey<Ascii>>(),
    value.parse::<MetadataValue<Ascii>>(),
  ) {
    (Ok(key), Ok(value)) => {
      target.append(key, value);
    }
    _ => {
      tracing::warn!(target: "grpc_reactive", key, "Dropping invalid metadata entry");
    }
  }
}

pub(crate) fn merge_metadata(target: &mut MetadataMap, source: &MetadataMap) {
  for entry in source.iter() {
    match entry {
      KeyAndValueRef::Ascii(key, value) => {
        target.append(key.clone(), value.clone());
      }
      KeyAndValueRef::Binary(key, value) => {
        target.append_bin(key.clone(), value.clone());
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tonic::Code;

  #[test]
  fn test_merge_is_right_biased() {
    let base = CallOptions::new()
      .with_timeout(Duration::from_secs(30))
      .with_metadata("x-env", "test");
    let override_opts = CallOptions::new().with_timeout(Duration::from_millis(50));

    let merged = base.merge(&override_opts);
    assert_eq!(merged.timeout, Some(Duration::from_millis(50)));
    assert_eq!(
      merged.metadata.get("x-env").unwrap().to_str().unwrap(),
      "test"
    );
  }

  #[test]
  fn test_merge_keeps_unset_fields_from_left() {
    let base = CallOptions::new().with_retry(RetryPolicy::fixed(
      3,
      Duration::from_millis(10),
      &[Code::Unavailable],
    ));
    let merged = base.merge(&CallOptions::new().with_timeout(Duration::from_secs(1)));

    assert!(merged.retry.is_some());
    assert_eq!(merged.timeout, Some(Duration::from_secs(1)));
  }

  #[test]
  fn test_merge_appends_metadata_entries() {
    let base = CallOptions::new().with_metadata("x-tag", "a");
    let merged = base.merge(&CallOptions::new().with_metadata("x-tag", "b"));

    let values: Vec<_> = merged
      .metadata
      .get_all("x-tag")
      .iter()
      .map(|v| v.to_str().unwrap())
      .collect();
    assert_eq!(values, vec!["a", "b"]);
  }
}
