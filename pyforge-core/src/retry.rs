//! Bounded retries with optional exponential back-off
//!
//! Wraps remote calls and archive extraction. Only errors that report
//! themselves as transient are retried.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Retry knobs, part of [`crate::config::ForgeConfig`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub initial_delay_ms: u64,

    /// Double the delay after every failed attempt
    pub exponential_backoff: bool,

    /// Upper bound for any single delay
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            exponential_backoff: true,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait before `attempt` (1-based); zero for the first attempt
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let base = self.initial_delay_ms;
        let delay_ms = if self.exponential_backoff {
            let shift = (attempt - 2).min(32);
            base.saturating_mul(1u64 << shift)
        } else {
            base
        };
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts();
        let mut attempt = 1;

        loop {
            let delay = self.delay_before(attempt);
            if !delay.is_zero() {
                tracing::info!(
                    attempt,
                    max_attempts = attempts,
                    backoff_ms = delay.as_millis() as u64,
                    "retrying {}",
                    label
                );
                tokio::time::sleep(delay).await;
            }

            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < attempts => {
                    tracing::warn!(attempt, error = %e, "transient failure in {}", label);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForgeError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay_ms: 1,
            exponential_backoff: true,
            max_delay_ms: 5,
        }
    }

    fn transient() -> ForgeError {
        ForgeError::Network {
            url: "https://example.invalid".to_string(),
            reason: "HTTP 503".to_string(),
            retryable: true,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay_ms: 500,
            exponential_backoff: true,
            max_delay_ms: 3_000,
        };
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(500));
        assert_eq!(policy.delay_before(3), Duration::from_millis(1_000));
        assert_eq!(policy.delay_before(4), Duration::from_millis(2_000));
        assert_eq!(policy.delay_before(5), Duration::from_millis(3_000));
        assert_eq!(policy.delay_before(40), Duration::from_millis(3_000));
    }

    #[test]
    fn test_constant_delay_without_backoff() {
        let policy = RetryPolicy {
            exponential_backoff: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_before(2), policy.delay_before(5));
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = fast_policy(3)
            .run("test", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = fast_policy(2)
            .run("test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = fast_policy(5)
            .run("test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ForgeError::version_format("x", "bad"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let _ = fast_policy(0)
            .run("test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(transient())
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
