//! Bounded retries with exponential backoff around store calls.

use std::{future::Future, time::Duration};

use tracing::warn;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Attempts after the first one.
  pub max_retries: u32,
  /// Delay before the first retry; doubles on each further retry.
  pub backoff:     Duration,
  /// Upper bound on a single attempt.
  pub timeout:     Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: 3,
      backoff:     Duration::from_millis(500),
      timeout:     Duration::from_secs(300),
    }
  }
}

impl RetryPolicy {
  pub fn delay_for(&self, retry: u32) -> Duration {
    self.backoff.saturating_mul(2u32.saturating_pow(retry))
  }
}

/// Run `op` until it succeeds, retrying backend errors up to
/// `policy.max_retries` times.
///
/// A timed-out attempt is not retried: the call may still complete on the
/// store's connection thread, and repeating a non-idempotent write would
/// duplicate it.
pub async fn with_retry<T, E, F, Fut>(
  policy: &RetryPolicy,
  operation: &'static str,
  mut op: F,
) -> Result<T, StoreError>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, E>>,
  E: std::error::Error + Send + Sync + 'static,
{
  let mut retry = 0;
  loop {
    let err = match tokio::time::timeout(policy.timeout, op()).await {
      Ok(Ok(value)) => return Ok(value),
      Ok(Err(err)) => err,
      Err(_) => return Err(StoreError::Timeout(policy.timeout)),
    };

    if retry >= policy.max_retries {
      return Err(StoreError::Backend {
        operation,
        attempts: retry + 1,
        source: Box::new(err),
      });
    }

    let delay = policy.delay_for(retry);
    warn!(operation, attempt = retry + 1, ?delay, error = %err, "store call failed; retrying");
    tokio::time::sleep(delay).await;
    retry += 1;
  }
}
