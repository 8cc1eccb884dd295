use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::RngExt;
use tonic::Code;

use crate::error::RpcError;

/// Outcome of consulting a retry policy after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
  /// Re-issue the same call after the given delay.
  RetryAfter(Duration),
  /// Deliver the failure to the caller.
  GiveUp,
}

type DecideFn = dyn Fn(u32, &RpcError) -> RetryDecision + Send + Sync;
type AttemptListener = dyn Fn(u32, &RpcError) + Send + Sync;

/// Pure retry decision function over (attempt number, last error).
///
/// A policy carries no mutable state: limits like maximum attempt counts are
/// closed over at construction, and the per-call attempt counter lives in the
/// call driver, so concurrent calls sharing one policy never interfere.
///
/// Intermediate attempt failures are invisible to the caller by default; an
/// attempt listener can be attached to observe them (telemetry).
#[derive(Clone)]
pub struct RetryPolicy {
  decide: Arc<DecideFn>,
  listener: Option<Arc<AttemptListener>>,
}

impl fmt::Debug for RetryPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RetryPolicy")
      .field("listener", &self.listener.is_some())
      .finish_non_exhaustive()
  }
}

impl RetryPolicy {
  pub fn new(decide: impl Fn(u32, &RpcError) -> RetryDecision + Send + Sync + 'static) -> Self {
    Self {
      decide: Arc::new(decide),
      listener: None,
    }
  }

  /// Retry with a fixed delay while the failure's code is in `codes`, for at
  /// most `max_attempts` total attempts.
  pub fn fixed(max_attempts: u32, delay: Duration, codes: &[Code]) -> Self {
    let codes = codes.to_vec();
    Self::new(move |attempt, error| {
      if attempt >= max_attempts || !codes.contains(&error.code()) {
        RetryDecision::GiveUp
      } else {
        RetryDecision::RetryAfter(delay)
      }
    })
  }

  /// Observe abandoned attempts without surfacing them to the caller.
  pub fn with_attempt_listener(
    mut self,
    listener: impl Fn(u32, &RpcError) + Send + Sync + 'static,
  ) -> Self {
    self.listener = Some(Arc::new(listener));
    self
  }

  /// Decide the fate of attempt `attempt` (1-based) after `error`.
  pub fn decide(&self, attempt: u32, error: &RpcError) -> RetryDecision {
    (self.decide)(attempt, error)
  }

  pub(crate) fn note_attempt(&self, attempt: u32, error: &RpcError) {
    if let Some(listener) = &self.listener {
      listener(attempt, error);
    }
  }
}

/// Exponential backoff configuration.
///
/// ## Example
/// ```ignore
/// use grpc_reactive::BackoffConfig;
/// use std::time::Duration;
/// use tonic::Code;
///
/// let policy = BackoffConfig::new()
///     .with_max_attempts(5)
///     .with_initial_delay(Duration::from_millis(100))
///     .with_retryable_codes(&[Code::Unavailable, Code::ResourceExhausted])
///     .into_policy();
/// ```
#[derive(Debug, Clone)]
pub struct BackoffConfig {
  pub max_attempts: u32,
  pub initial_delay: Duration,
  pub max_delay: Duration,
  pub multiplier: f64,
  pub jitter: bool,
  pub retryable: Vec<Code>,
}

impl Default for BackoffConfig {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      initial_delay: Duration::from_millis(100),
      max_delay: Duration::from_secs(5),
      multiplier: 2.0,
      jitter: true,
      retryable: vec![Code::Unavailable],
    }
  }
}

impl BackoffConfig {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
    self.max_attempts = max_attempts;
    self
  }

  pub fn with_initial_delay(mut self, delay: Duration) -> Self {
    self.initial_delay = delay;
    self
  }

  pub fn with_max_delay(mut self, delay: Duration) -> Self {
    self.max_delay = delay;
    self
  }

  pub fn with_multiplier(mut self, multiplier: f64) -> Self {
    self.multiplier = multiplier;
    self
  }

  /// Disable jitter, making delays deterministic.
  pub fn without_jitter(mut self) -> Self {
    self.jitter = false;
    self
  }

  pub fn with_retryable_codes(mut self, codes: &[Code]) -> Self {
    self.retryable = codes.to_vec();
    self
  }

  /// Build the decision function.
  pub fn into_policy(self) -> RetryPolicy {
    RetryPolicy::new(move |attempt, error| {
      if attempt >= self.max_attempts || !self.retryable.contains(&error.code()) {
        return RetryDecision::GiveUp;
      }
      let exponent = self.multiplier.powi(attempt.saturating_sub(1) as i32);
      let base = self.initial_delay.as_millis() as f64 * exponent;
      let capped = base.min(self.max_delay.as_millis() as f64);
      let delay_ms = if self.jitter {
        // Decorrelated within [capped / 2, capped].
        rand::rng().random_range(capped / 2.0..=capped)
      } else {
        capped
      };
      RetryDecision::RetryAfter(Duration::from_millis(delay_ms as u64))
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_fixed_policy_gives_up_after_max_attempts() {
    let policy = RetryPolicy::fixed(3, Duration::from_millis(10), &[Code::Unavailable]);
    let error = RpcError::unavailable("down");

    assert_eq!(
      policy.decide(1, &error),
      RetryDecision::RetryAfter(Duration::from_millis(10))
    );
    assert_eq!(
      policy.decide(2, &error),
      RetryDecision::RetryAfter(Duration::from_millis(10))
    );
    assert_eq!(policy.decide(3, &error), RetryDecision::GiveUp);
  }

  #[test]
  fn test_fixed_policy_ignores_non_retryable_codes() {
    let policy = RetryPolicy::fixed(3, Duration::from_millis(10), &[Code::Unavailable]);
    let error = RpcError::invalid_argument("bad request");
    assert_eq!(policy.decide(1, &error), RetryDecision::GiveUp);
  }

  #[test]
  fn test_backoff_grows_exponentially_without_jitter() {
    let policy = BackoffConfig::new()
      .with_max_attempts(10)
      .with_initial_delay(Duration::from_millis(100))
      .with_multiplier(2.0)
      .without_jitter()
      .into_policy();
    let error = RpcError::unavailable("down");

    assert_eq!(
      policy.decide(1, &error),
      RetryDecision::RetryAfter(Duration::from_millis(100))
    );
    assert_eq!(
      policy.decide(2, &error),
      RetryDecision::RetryAfter(Duration::from_millis(200))
    );
    assert_eq!(
      policy.decide(3, &error),
      RetryDecision::RetryAfter(Duration::from_millis(400))
    );
  }

  #[test]
  fn test_backoff_respects_max_delay() {
    let policy = BackoffConfig::new()
      .with_max_attempts(20)
      .with_initial_delay(Duration::from_millis(100))
      .with_max_delay(Duration::from_millis(250))
      .without_jitter()
      .into_policy();
    let error = RpcError::unavailable("down");

    assert_eq!(
      policy.decide(5, &error),
      RetryDecision::RetryAfter(Duration::from_millis(250))
    );
  }

  #[test]
  fn test_backoff_jitter_stays_within_bounds() {
    let policy = BackoffConfig::new()
      .with_max_attempts(10)
      .with_initial_delay(Duration::from_millis(100))
      .into_policy();
    let error = RpcError::unavailable("down");

    for _ in 0..50 {
      match policy.decide(1, &error) {
        RetryDecision::RetryAfter(delay) => {
          assert!(delay >= Duration::from_millis(50));
          assert!(delay <= Duration::from_millis(100));
        }
        RetryDecision::GiveUp => panic!("expected a retry"),
      }
    }
  }
}
