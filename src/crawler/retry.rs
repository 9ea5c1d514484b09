use rand::{thread_rng, Rng};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::cli::config::RetryPolicySettings;

/// Exponential backoff with jitter, bounded by an attempt ceiling
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: f64,
}

/// The last error seen once every attempt failed
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl RetryPolicy {
    /// A policy that tries once and never waits
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Delay before the retry that follows the given (1-based) failed attempt,
    /// without jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }

        let spread = self.jitter.min(1.0);
        let factor = thread_rng().gen_range((1.0 - spread)..=(1.0 + spread));
        delay.mul_f64(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, `retryable` rejects its error, or the
    /// attempt ceiling is reached
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        mut op: F,
        retryable: impl Fn(&E) -> bool,
    ) -> Result<T, Exhausted<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", label, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if attempt < max_attempts && retryable(&e) => {
                    let delay = self.jittered(self.backoff(attempt));
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                        label, attempt, max_attempts, e, delay
                    );
                    sleep(delay).await;
                }
                Err(e) => {
                    return Err(Exhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }
            }
        }
    }
}

impl From<&RetryPolicySettings> for RetryPolicy {
    fn from(settings: &RetryPolicySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            multiplier: settings.multiplier,
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter: settings.jitter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(4),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: 0.0,
        }
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = policy();
        assert_eq!(policy.backoff(1), Duration::from_secs(4));
        assert_eq!(policy.backoff(2), Duration::from_secs(8));
        assert_eq!(policy.backoff(3), Duration::from_secs(10));
        assert_eq!(policy.backoff(30), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_within_cap() {
        let policy = RetryPolicy { jitter: 0.5, ..policy() };
        for _ in 0..100 {
            let delay = policy.jittered(policy.backoff(1));
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_secs(6));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: Result<u32, Exhausted<String>> = policy()
            .run(
                "load",
                || async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 { Err(format!("timeout {}", n)) } else { Ok(n) }
                },
                |_| true,
            )
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_at_ceiling() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: Result<(), Exhausted<String>> = policy()
            .run(
                "load",
                || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("timeout".to_string())
                },
                |_| true,
            )
            .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 3);
        assert_eq!(exhausted.last_error, "timeout");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_does_not_retry_rejected_errors() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: Result<(), Exhausted<String>> = policy()
            .run(
                "load",
                || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("fatal".to_string())
                },
                |e| e != "fatal",
            )
            .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
