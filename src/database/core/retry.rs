//! Bounded retry policy shared by the connection manager and the init coordinator
//!
//! Each layer holds its own [`RetryPolicy`]; the outer one never looks at how
//! the inner one retries.

use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// How many times to try an operation and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one (at least 1)
    pub max_attempts: u32,
    /// Fixed pause between two attempts
    pub delay: Duration,
    /// Upper bound of a random extra pause added to `delay`
    pub jitter: Duration,
}

/// Returned when every attempt of a [`RetryPolicy`] failed
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::connection()
    }
}

impl RetryPolicy {
    /// Policy used when opening the database: 5 attempts, 1.5 s apart
    pub const fn connection() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(1500),
            jitter: Duration::ZERO,
        }
    }

    /// Policy used by the startup coordinator: 3 attempts, no pause
    pub const fn initialization() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// A single attempt, never retried
    pub const fn once() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Pause to take before the next attempt
    pub fn next_delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.delay;
        }
        let extra = OsRng.next_u64() % (jitter_ms + 1);
        self.delay + Duration::from_millis(extra)
    }

    /// Run `operation` until it succeeds or the attempts run out
    ///
    /// The closure receives the 1-based attempt number so callers can change
    /// behavior on retries.
    pub async fn run<T, E, F, Fut>(&self, name: &str, mut operation: F) -> Result<T, Exhausted<E>>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let start_time = Instant::now();
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(
                            "'{}' succeeded after {} attempts in {:?}",
                            name,
                            attempt,
                            start_time.elapsed()
                        );
                    }
                    return Ok(value);
                }
                Err(error) if attempt >= max_attempts => {
                    warn!(
                        "'{}' failed after {} attempts over {:?}, giving up: {}",
                        name,
                        attempt,
                        start_time.elapsed(),
                        error
                    );
                    return Err(Exhausted {
                        attempts: attempt,
                        last_error: error,
                    });
                }
                Err(error) => {
                    let delay = self.next_delay();
                    warn!(
                        "'{}' failed (attempt {}/{}), retrying in {:?}: {}",
                        name, attempt, max_attempts, delay, error
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_default_policies() {
        let conn = RetryPolicy::connection();
        assert_eq!(conn.max_attempts, 5);
        assert_eq!(conn.delay, Duration::from_millis(1500));

        let init = RetryPolicy::initialization();
        assert_eq!(init.max_attempts, 3);
        assert_eq!(init.next_delay(), Duration::ZERO);
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy::once()
            .with_delay(Duration::from_millis(10))
            .with_jitter(Duration::from_millis(5));
        for _ in 0..50 {
            let d = policy.next_delay();
            assert!(d >= Duration::from_millis(10));
            assert!(d <= Duration::from_millis(15));
        }
    }

    #[test]
    fn test_max_attempts_never_zero() {
        assert_eq!(RetryPolicy::once().with_max_attempts(0).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_success_after_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::connection().with_delay(Duration::ZERO);

        let result = policy
            .run("flaky", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(format!("attempt {attempt} failed"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_error() {
        let policy = RetryPolicy::initialization();

        let result: Result<(), _> = policy
            .run("always-fails", |attempt| async move {
                Err(format!("boom {attempt}"))
            })
            .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 3);
        assert_eq!(exhausted.last_error, "boom 3");
    }
}
