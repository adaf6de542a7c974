//! Database Retry Logic
//!
//! One retry policy, applied by the store to every pooled operation.
//! Lock conflicts and pool timeouts are retried with jittered exponential
//! backoff; any other error is returned immediately.

use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::{Error, Result};

/// Bounded exponential backoff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Upper bound for a single delay (before jitter)
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after `attempt` failed (1-based), without jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }

    /// Backoff plus up to 50% random jitter
    fn jittered_backoff(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        let jitter_cap = (delay.as_millis() as u64) / 2;
        if jitter_cap == 0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0..=jitter_cap);
        delay + Duration::from_millis(jitter)
    }

    /// Decide what to do after attempt number `attempt` (1-based) failed.
    ///
    /// Exhausted lock conflicts surface as [`Error::WriteContention`],
    /// exhausted pool timeouts as [`Error::PoolExhausted`]; anything else
    /// fails immediately.
    pub fn on_error(&self, operation_name: &str, attempt: u32, err: Error) -> RetryDecision {
        let contention = err.is_contention();
        let pool_timeout = err.is_pool_timeout();
        if !contention && !pool_timeout {
            return RetryDecision::Fail(err);
        }

        if attempt >= self.max_attempts.max(1) {
            tracing::error!(
                operation = operation_name,
                attempt,
                error = %err,
                "Database operation failed: retry budget exhausted"
            );
            let operation = operation_name.to_string();
            return RetryDecision::Fail(if pool_timeout {
                Error::PoolExhausted {
                    operation,
                    attempts: attempt,
                }
            } else {
                Error::WriteContention {
                    operation,
                    attempts: attempt,
                }
            });
        }

        let delay = self.jittered_backoff(attempt);
        tracing::warn!(
            operation = operation_name,
            attempt,
            backoff_ms = delay.as_millis() as u64,
            reason = if pool_timeout { "pool timeout" } else { "lock conflict" },
            "Database busy, will retry after backoff"
        );
        RetryDecision::Retry(delay)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempt budget is spent.
    pub async fn run<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let start_time = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        tracing::debug!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms = start_time.elapsed().as_millis() as u64,
                            "Database operation succeeded after retry"
                        );
                    }
                    return Ok(result);
                }
                Err(err) => match self.on_error(operation_name, attempt, err) {
                    RetryDecision::Retry(delay) => tokio::time::sleep(delay).await,
                    RetryDecision::Fail(err) => return Err(err),
                },
            }
        }
    }
}

/// Outcome of [`RetryPolicy::on_error`]
#[derive(Debug)]
pub enum RetryDecision {
    /// Sleep for the delay, then try again
    Retry(Duration),
    /// Give up with this error
    Fail(Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(20));
        assert_eq!(policy.backoff(3), Duration::from_millis(40));
        assert_eq!(policy.backoff(4), Duration::from_millis(50));
        assert_eq!(policy.backoff(30), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_attempt() {
        let result = fast_policy(3)
            .run("test_op", || async { Ok::<i32, Error>(42) })
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_pool_timeouts() {
        let attempts = AtomicU32::new(0);
        let result = fast_policy(5)
            .run("test_op", || {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(Error::Database(sqlx::Error::PoolTimedOut))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_pool_timeouts_surface_typed_error() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = fast_policy(4)
            .run("tracks::lookup", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::Database(sqlx::Error::PoolTimedOut)) }
            })
            .await;

        match result {
            Err(Error::PoolExhausted { operation, attempts: n }) => {
                assert_eq!(operation, "tracks::lookup");
                assert_eq!(n, 4);
            }
            other => panic!("Expected PoolExhausted, got {:?}", other),
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = fast_policy(5)
            .run("test_op", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::Internal("other error".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(Error::Internal(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
