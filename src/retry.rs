// ABOUTME: Bounded retry with exponential backoff and jitter
// ABOUTME: Wraps single network operations, retrying only transient failures

use crate::error::TransferError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Retry policy for a single fallible unit of work.
///
/// `retries` counts total attempts, not re-attempts: a policy with
/// `retries = 3` runs the operation at most three times. Only errors whose
/// [`TransferError::is_transient`] is true are retried; anything else
/// propagates on first occurrence. The delay before retry `k` (1-indexed)
/// is `initial_delay * backoff^(k-1)` plus a uniform random jitter.
///
/// The policy wraps the innermost operation — one page fetch, one chunk
/// load, one metadata query — never an enclosing loop, so a retry never
/// re-executes work that already succeeded.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub retries: u32,
    pub initial_delay: Duration,
    pub backoff: f64,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            retries: 3,
            initial_delay: Duration::from_secs(1),
            backoff: 2.0,
            jitter: Duration::from_millis(300),
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: u32, initial_delay: Duration) -> Self {
        RetryPolicy {
            retries,
            initial_delay,
            ..Default::default()
        }
    }

    /// Execute `operation`, retrying transient failures up to the attempt
    /// budget. The final error is returned to the caller, never swallowed.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T, TransferError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransferError>>,
    {
        let attempts = self.retries.max(1);
        let mut delay = self.initial_delay;

        for attempt in 1..=attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < attempts => {
                    let sleep = delay + self.sample_jitter();
                    tracing::warn!(
                        "Attempt {}/{} failed: {}. Retrying in {:.2?}...",
                        attempt,
                        attempts,
                        e,
                        sleep
                    );
                    tokio::time::sleep(sleep).await;
                    delay = delay.mul_f64(self.backoff);
                }
                Err(e) => return Err(e),
            }
        }

        unreachable!("retry loop always returns on the final attempt")
    }

    fn sample_jitter(&self) -> Duration {
        let bound = self.jitter.as_millis() as u64;
        if bound == 0 {
            return Duration::ZERO;
        }
        let millis = rand::thread_rng().gen_range(0..=bound);
        Duration::from_millis(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(retries: u32) -> RetryPolicy {
        RetryPolicy {
            retries,
            initial_delay: Duration::from_millis(5),
            backoff: 2.0,
            jitter: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = fast_policy(5)
            .execute(|| {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(TransferError::Transient("connection reset".into()))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_attempts_and_surfaces_final_error() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<(), _> = fast_policy(3)
            .execute(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(TransferError::Transient("still down".into())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_error_propagates_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<(), _> = fast_policy(5)
            .execute(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(TransferError::Validation("column not found".into())) }
            })
            .await;

        assert!(matches!(result, Err(TransferError::Validation(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_retries_still_runs_once() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = fast_policy(0)
            .execute(|| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(42) }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
