//! Bounded retry with a fixed delay.
//!
//! Girder's stores never retry internally; callers wrap operations in
//! [`RetryPolicy::run`] with a budget that fits their context. Only
//! transient I/O failures are retried. `NotFound`, `Conflict`, and
//! validation errors carry meaning and pass straight through.

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// How many times to attempt an operation and how long to sleep between
/// attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or
    /// the attempt budget is exhausted.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last = None;
        for attempt in 1..=self.attempts.max(1) {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    tracing::debug!(attempt, error = %err, "transient failure, will retry");
                    last = Some(err);
                    if attempt < self.attempts {
                        tokio::time::sleep(self.delay).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Err(last.unwrap_or_else(|| Error::TransientIo("retry budget exhausted".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let calls = AtomicU32::new(0);
        let out = policy()
            .run(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::TransientIo("flaky".into()))
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();
        assert_eq!(out, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn conflict_is_not_retried() {
        let calls = AtomicU32::new(0);
        let err = policy()
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::Conflict("claimed elsewhere".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_budget_returns_last_transient_error() {
        let calls = AtomicU32::new(0);
        let err = policy()
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::TransientIo("still down".into()))
            })
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
