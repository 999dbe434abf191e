//! Retry with exponential backoff and jitter.
//!
//! Retryable: transport errors, rate-limit signals, 5xx. Non-retryable: other
//! 4xx, content errors, configuration errors. Each attempt resets the
//! per-request timer (the timeout lives on the reqwest call itself).

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use cartelera_common::IngestError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub base: f64,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            base: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// `delay_n = min(max, initial * base^(n-1)) + U(0, jitter)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponential =
            self.initial_delay.as_secs_f64() * self.base.powi(attempt.saturating_sub(1) as i32);
        let capped = exponential.min(self.max_delay.as_secs_f64());
        let jitter = rand::rng().random_range(0.0..=self.jitter.as_secs_f64());
        Duration::from_secs_f64(capped + jitter)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is exhausted. The closure receives the 1-indexed attempt.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    op_name: &str,
    mut op: F,
) -> Result<T, IngestError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, IngestError>>,
{
    let mut last_error = None;

    for attempt in 1..=policy.max_attempts {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() => {
                if attempt < policy.max_attempts {
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(
                        op = op_name,
                        attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retryable error"
                    );
                    tokio::time::sleep(delay).await;
                }
                last_error = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_error
        .unwrap_or_else(|| IngestError::Config(format!("{op_name}: zero retry attempts"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            base: 2.0,
            max_delay: Duration::from_millis(10),
            jitter: Duration::from_millis(0),
        }
    }

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            base: 2.0,
            max_delay: Duration::from_secs(5),
            jitter: Duration::from_secs(0),
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn transient_failures_then_success_returns_once() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(), "test", |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(IngestError::Transport("connection reset".to_string()))
                } else {
                    Ok("payload")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "payload");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn persistent_failure_surfaces_single_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(IngestError::Transport("down".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(IngestError::Client {
                    status: 404,
                    message: "not found".to_string(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rate_limit_is_retryable() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(), "test", |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(IngestError::RateLimited {
                        domain: "example.es".to_string(),
                        status: 429,
                    })
                } else {
                    Ok(serde_json::json!({"ok": true}))
                }
            }
        })
        .await;

        assert_eq!(result.unwrap()["ok"], true);
    }
}
