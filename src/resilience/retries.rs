//! Bounded retry with exponential backoff.
//!
//! One policy object serves every retrying call in the crate: check-in,
//! global-state fetch and agent dispatch. There is no unbounded retry.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::resilience::backoff::calculate_backoff;

/// Retry policy parameterized by attempt count and base delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

/// Returned when the operation failed and no further attempt was made.
#[derive(Debug)]
pub struct RetryError<E> {
    /// Attempts made before giving up.
    pub attempts: u32,
    /// Error of the last attempt.
    pub last: E,
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gave up after {} attempt(s): {}", self.attempts, self.last)
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.last)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, config: &RetryConfig) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }

    /// Delay after the given failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_delay_ms, self.max_delay_ms)
    }

    /// Run `op` until it succeeds or the attempts are exhausted.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, what: &str, op: F) -> Result<T, RetryError<E>>
    where
        E: fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_if(what, op, |_| true).await
    }

    /// Like [`RetryPolicy::run`], but only errors accepted by `retryable` are retried.
    pub async fn run_if<T, E, F, Fut, R>(&self, what: &str, mut op: F, retryable: R) -> Result<T, RetryError<E>>
    where
        E: fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt >= self.max_attempts || !retryable(&e) {
                        tracing::warn!(operation = what, attempt, error = %e, "Giving up");
                        return Err(RetryError { attempts: attempt, last: e });
                    }
                    let delay = self.delay(attempt);
                    tracing::info!(operation = what, attempt, delay = ?delay, error = %e, "Retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 5,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = policy(3)
            .run("test", move |_| async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("not yet")
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_error() {
        let result: Result<(), _> = policy(4).run("test", |attempt| async move { Err(format!("failure {}", attempt)) }).await;
        let err = result.unwrap_err();
        assert_eq!(err.attempts, 4);
        assert_eq!(err.last, "failure 4");
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = policy(5)
            .run_if(
                "test",
                move |_| async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(404u16)
                },
                |code| *code >= 500,
            )
            .await;
        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
