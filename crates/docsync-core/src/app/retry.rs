//! Retry policy: bounded attempts with exponential backoff.

use std::future::Future;
use std::time::Duration;

/// Retry policy for calls to external systems.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first call included.
    pub max_attempts: u32,

    /// Delay after the first failure.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

/// The last error once every attempt failed.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// Delay before the next attempt, given `attempts` already made (1-indexed).
    ///
    /// base_delay * multiplier^(attempts - 1): 2s, 4s, 8s, ...
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        Duration::from_secs_f64(base_secs * self.multiplier.powi(exponent))
    }

    /// Call `op` until it succeeds or `max_attempts` is used up.
    ///
    /// Sleeps with `tokio::time::sleep`, so paused-clock tests see exact delays.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, Exhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= max_attempts => {
                    return Err(Exhausted {
                        attempts: attempt,
                        last_error: err,
                    });
                }
                Err(err) => {
                    let delay = self.next_delay(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        delay = ?delay,
                        error = %err,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn default_policy_matches_upload_settings() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(2));
        assert_eq!(policy.multiplier, 2.0);
    }

    #[test]
    fn exponential_backoff_increases() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(1), Duration::from_secs(2));
        assert_eq!(policy.next_delay(2), Duration::from_secs(4));
        assert_eq!(policy.next_delay(3), Duration::from_secs(8));
        // attempts=0 は base_delay
        assert_eq!(policy.next_delay(0), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_after_2s_and_4s() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();
        let mut seen = Vec::new();

        let result = policy
            .run(|attempt| {
                seen.push(started.elapsed());
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if attempt < 3 { Err("down") } else { Ok(attempt) }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            seen,
            vec![
                Duration::ZERO,
                Duration::from_secs(2),
                Duration::from_secs(6)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let policy = RetryPolicy::new(2, Duration::from_secs(1));
        let result: Result<(), _> = policy.run(|_| async { Err("still down") }).await;
        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 2);
        assert_eq!(exhausted.last_error, "still down");
    }
}
