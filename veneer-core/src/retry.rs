//! Bounded retry with exponential backoff on transient reconnect failures.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::VeneerResult;

/// Default backoff base.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(10);

/// How often, and how patiently, a driver call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retries: u32,
    /// Backoff base. Attempt `n` waits `delay * 2^n` before the next one.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 0,
            delay: DEFAULT_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Create a policy.
    pub const fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }

    /// Set the number of retries.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the backoff base.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sleep taken after failed attempt `attempt` (zero-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Run `op` up to `retries + 1` times.
    ///
    /// Only [`VeneerError::Reconnect`](crate::VeneerError::Reconnect) is
    /// retried; any other error is returned at once. When attempts run out the
    /// last reconnect error is returned as is.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> VeneerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = VeneerResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(err) if err.is_reconnect() && attempt < self.retries => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        operation = operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Lost connection, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VeneerError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_calculation() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn test_policy_builder() {
        let policy = RetryPolicy::default()
            .retries(5)
            .delay(Duration::from_millis(50));
        assert_eq!(policy, RetryPolicy::new(5, Duration::from_millis(50)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(10));
        let start = tokio::time::Instant::now();

        let result = policy
            .run("test", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(VeneerError::reconnect("connection reset"))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_return_last_reconnect() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::new(1, Duration::from_millis(10));

        let result: VeneerResult<()> = policy
            .run("test", move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err(VeneerError::reconnect(format!("attempt {}", n)))
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_reconnect());
        assert_eq!(err.to_string(), "transient connection failure: attempt 1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(10));

        let result: VeneerResult<()> = policy
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(VeneerError::driver("duplicate key"))
            })
            .await;

        assert!(matches!(result, Err(VeneerError::Driver(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
