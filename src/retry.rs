//! Bounded retry with fixed delay.
//!
//! The orchestrator applies the same policy to availability waits and to
//! stage execution failures, so the policy lives in its own type composed
//! around any fallible async operation rather than being baked into a
//! sleep loop at each call site.

use anyhow::{Context, Result};
use std::future::Future;
use std::time::Duration;

/// Fixed-delay retry policy: up to `max_attempts` tries, sleeping `delay`
/// after each non-final failure.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        // Zero attempts would make every operation an unconditional failure
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `operation` until it succeeds or the attempt budget is spent.
    ///
    /// The closure receives the 1-based attempt number for diagnostics. The
    /// final error carries `what` and the attempt count for alerting.
    pub async fn run<T, F, Fut>(&self, what: &str, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(e.context(format!(
                        "{what} failed after {attempt} attempt(s)"
                    )));
                }
                Err(e) => {
                    tracing::warn!(
                        "{what} attempt {attempt}/{} failed, retrying in {:?}: {e:#}",
                        self.max_attempts,
                        self.delay
                    );
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(5, Duration::from_secs(3600));
        let calls = AtomicU32::new(0);

        let result = policy
            .run("test operation", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        anyhow::bail!("not yet")
                    }
                    Ok(attempt)
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_attempt_count() {
        let policy = RetryPolicy::new(4, Duration::from_secs(1));

        let err = policy
            .run("doomed operation", |_| async {
                Err::<(), _>(anyhow::anyhow!("nope"))
            })
            .await
            .unwrap_err();

        let message = format!("{err:#}");
        assert!(message.contains("doomed operation"));
        assert!(message.contains("4 attempt(s)"));
    }

    #[tokio::test]
    async fn first_success_sleeps_zero_times() {
        // Unpaused runtime: a single success must not sleep at all
        let policy = RetryPolicy::new(10, Duration::from_secs(3600));
        let value = policy.run("instant", |_| async { Ok(42) }).await.unwrap();
        assert_eq!(value, 42);
    }
}
