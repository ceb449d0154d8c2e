//! Fixed-delay retry policies.
//!
//! A [`RetryPolicy`] wraps a call-site closure with a hard attempt ceiling
//! and a constant delay between attempts (no backoff, no jitter). Two modes
//! exist and they change the return type:
//!
//! - [`Propagate`] (default): exhausting the budget returns the last error.
//! - [`IgnoreExhaustion`]: exhausting the budget returns `Ok(None)`.
//!
//! Errors rejected by the retryable predicate are returned immediately in
//! both modes.

use backon::{ConstantBuilder, Retryable};
use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::{debug, error};

use crate::error::{OrchestratorError, Result};

/// Exhaustion returns the last error.
#[derive(Debug, Clone, Copy, Default)]
pub struct Propagate;

/// Exhaustion returns no result.
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreExhaustion;

/// A bounded, fixed-delay retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy<M = Propagate> {
    max_attempts: usize,
    delay: Duration,
    _mode: PhantomData<M>,
}

impl RetryPolicy<Propagate> {
    /// Creates a policy making at most `max_attempts` calls, sleeping `delay`
    /// between them. A ceiling of zero is treated as one attempt.
    pub fn fixed(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            _mode: PhantomData,
        }
    }

    /// Switches to ignore-after-exhaustion mode.
    pub fn ignore_exhaustion(self) -> RetryPolicy<IgnoreExhaustion> {
        RetryPolicy {
            max_attempts: self.max_attempts,
            delay: self.delay,
            _mode: PhantomData,
        }
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt ceiling is reached.
    pub async fn run<T, F, Fut, P>(&self, what: &str, op: F, retryable: P) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&OrchestratorError) -> bool,
    {
        let result = self.attempt(what, op, &retryable).await;
        if let Err(e) = &result {
            if retryable(e) {
                error!(what, attempts = self.max_attempts, error = %e, "Retries exhausted");
            }
        }
        result
    }
}

impl RetryPolicy<IgnoreExhaustion> {
    /// Like [`RetryPolicy::run`], but exhaustion yields `Ok(None)`.
    pub async fn run<T, F, Fut, P>(&self, what: &str, op: F, retryable: P) -> Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&OrchestratorError) -> bool,
    {
        match self.attempt(what, op, &retryable).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if retryable(&e) => {
                debug!(
                    what,
                    attempts = self.max_attempts,
                    error = %e,
                    "Retries exhausted, ignoring"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

impl<M> RetryPolicy<M> {
    /// Maximum number of calls.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Delay between calls.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    async fn attempt<T, F, Fut, P>(&self, what: &str, op: F, retryable: &P) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&OrchestratorError) -> bool,
    {
        let backoff = ConstantBuilder::default()
            .with_delay(self.delay)
            .with_max_times(self.max_attempts - 1);
        let mut attempt = 0usize;

        op.retry(backoff)
            .when(|e| retryable(e))
            .notify(|e: &OrchestratorError, delay: Duration| {
                attempt += 1;
                debug!(
                    what,
                    attempt,
                    max_attempts = self.max_attempts,
                    delay = ?delay,
                    error = %e,
                    "Attempt failed, retrying"
                );
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn policy(attempts: usize) -> RetryPolicy {
        RetryPolicy::fixed(attempts, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicUsize::new(0);
        let result = policy(5)
            .run(
                "ping",
                || async {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(OrchestratorError::not_ready("rs0-1"))
                    } else {
                        Ok(n)
                    }
                },
                OrchestratorError::is_retryable,
            )
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = policy(4)
            .run(
                "ping",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(OrchestratorError::not_ready("rs0-1"))
                },
                OrchestratorError::is_retryable,
            )
            .await;

        assert!(matches!(result, Err(OrchestratorError::NotReady { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = policy(10)
            .run(
                "ping",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(OrchestratorError::no_usable_shell("abc"))
                },
                OrchestratorError::is_retryable,
            )
            .await;

        assert!(matches!(result, Err(OrchestratorError::NoUsableShell { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ignore_mode_returns_none_on_exhaustion() {
        let result: Result<Option<()>> = policy(2)
            .ignore_exhaustion()
            .run(
                "ping",
                || async { Err(OrchestratorError::not_ready("rs0-1")) },
                OrchestratorError::is_retryable,
            )
            .await;
        assert!(matches!(result, Ok(None)));

        let result: Result<Option<()>> = policy(2)
            .ignore_exhaustion()
            .run(
                "ping",
                || async { Err(OrchestratorError::no_usable_shell("abc")) },
                OrchestratorError::is_retryable,
            )
            .await;
        assert!(result.is_err());

        let result = policy(2)
            .ignore_exhaustion()
            .run("ping", || async { Ok(7) }, OrchestratorError::is_retryable)
            .await;
        assert_eq!(result.unwrap(), Some(7));
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryPolicy::fixed(0, Duration::ZERO).max_attempts(), 1);
    }
}
