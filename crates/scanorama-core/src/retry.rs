//! Exponential backoff for the Worker Pool's per-job retry policy.
//!
//! `delay = RetryDelay * BackoffMultiplier^(retries-1)`, capped by
//! `RetryDelayMax`. The exponent is clamped to 31 before exponentiating so
//! a misconfigured multiplier can never overflow the delay computation.

use crate::config::RetryPolicyConfig;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Delay before the `retries`-th retry (1-indexed: the first retry uses
/// exponent 0, i.e. the base delay unmodified).
pub fn backoff_delay(policy: &RetryPolicyConfig, retries: u32) -> Duration {
    let exponent = retries.saturating_sub(1).min(31);
    let factor = (policy.backoff_multiplier as u64).saturating_pow(exponent);
    let delay_ms = policy.retry_delay_ms.saturating_mul(factor);
    Duration::from_millis(delay_ms.min(policy.retry_delay_max_ms))
}

/// Retry a fallible async operation (one `Job` execution) according to
/// `policy`. Attempts up to `max_retries + 1` times total; sleeps with
/// [`backoff_delay`] between attempts. `is_retriable` decides whether a
/// given error is worth retrying at all (Validation/Cancelled/Shutdown
/// never are).
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    mut operation: F,
    policy: &RetryPolicyConfig,
    is_retriable: R,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let mut retries = 0u32;

    loop {
        match operation().await {
            Ok(result) => {
                if retries > 0 {
                    debug!(retries, "job succeeded after retrying");
                }
                return Ok(result);
            }
            Err(e) => {
                let should_retry = retries < policy.max_retries && is_retriable(&e);
                if !should_retry {
                    debug!(retries, error = %e, "giving up on job");
                    return Err(e);
                }

                retries += 1;
                let delay = backoff_delay(policy, retries);
                debug!(retries, ?delay, error = %e, "retrying job after backoff");
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max_retries: u32, delay_ms: u64, multiplier: u32) -> RetryPolicyConfig {
        RetryPolicyConfig {
            max_retries,
            retry_delay_ms: delay_ms,
            backoff_multiplier: multiplier,
            retry_delay_max_ms: 30_000,
        }
    }

    #[test]
    fn backoff_delay_matches_formula() {
        let p = policy(5, 10, 2);
        assert_eq!(backoff_delay(&p, 1), Duration::from_millis(10));
        assert_eq!(backoff_delay(&p, 2), Duration::from_millis(20));
        assert_eq!(backoff_delay(&p, 3), Duration::from_millis(40));
    }

    #[test]
    fn backoff_delay_is_capped() {
        let p = policy(10, 1000, 2);
        assert_eq!(backoff_delay(&p, 10), Duration::from_millis(30_000));
    }

    #[test]
    fn backoff_delay_exponent_clamped_never_overflows() {
        let p = policy(u32::MAX, 1, 2);
        let d = backoff_delay(&p, u32::MAX);
        assert_eq!(d, Duration::from_millis(p.retry_delay_max_ms));
    }

    #[tokio::test]
    async fn retry_succeeds_immediately() {
        let result = retry_with_backoff(
            || async { Ok::<_, String>(42) },
            &policy(3, 1, 2),
            |_| true,
        )
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_retries() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result = retry_with_backoff(
            || {
                let attempts = attempts_clone.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>("scan failed")
                }
            },
            &policy(2, 1, 2),
            |_| true,
        )
        .await;

        assert!(result.is_err());
        // initial attempt + 2 retries = 3 total attempts
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_never_exceeds_max_retries() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let _ = retry_with_backoff(
            || {
                let attempts = attempts_clone.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>(n)
                }
            },
            &policy(2, 1, 2),
            |_| true,
        )
        .await;

        assert!(attempts.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn non_retriable_error_stops_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result = retry_with_backoff(
            || {
                let attempts = attempts_clone.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>("validation error")
                }
            },
            &policy(5, 1, 2),
            |_| false,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_timing_matches_scenario_s2() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let start = std::time::Instant::now();
        let _ = retry_with_backoff(
            || {
                let attempts = attempts_clone.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>("scan failed")
                }
            },
            &policy(2, 10, 2),
            |_| true,
        )
        .await;
        let elapsed = start.elapsed();

        // ~10ms then ~20ms between the three attempts.
        assert!(elapsed >= Duration::from_millis(30));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
