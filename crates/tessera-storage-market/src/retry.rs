//! Per-call timeouts and exponential backoff with jitter for network calls.

use crate::error::{Result, StorageMarketError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub per_call_timeout: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Fraction of the delay added as random jitter (0.0 – 1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            per_call_timeout: Duration::from_secs(30),
            max_attempts: 5,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(60),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// `base × 2^attempt`, capped, before jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let backoff = self.backoff_base.saturating_mul(2u32.saturating_pow(attempt.min(16)));
        backoff.min(self.backoff_max)
    }

    pub fn backoff_with_jitter(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || backoff.is_zero() {
            return backoff;
        }
        let extra = backoff.mul_f64(rand::thread_rng().gen_range(0.0..jitter));
        backoff + extra
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. Each attempt is bounded by the per-call
    /// timeout; a timeout counts as a transient failure.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            let outcome = match tokio::time::timeout(self.per_call_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(StorageMarketError::TransientNetwork(format!(
                    "{} timed out after {:?}",
                    operation, self.per_call_timeout
                ))),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    last_error = e.to_string();
                    if attempt + 1 < attempts {
                        let delay = self.backoff_with_jitter(attempt);
                        warn!(
                            operation,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Retrying after transient failure"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(StorageMarketError::RetryBudgetExhausted {
            operation: operation.to_string(),
            attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            per_call_timeout: Duration::from_millis(50),
            max_attempts: 3,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(4),
            jitter: 0.5,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert!(policy.backoff(1) > policy.backoff(0));
        assert_eq!(policy.backoff(30), policy.backoff_max);
        let jittered = policy.backoff_with_jitter(2);
        assert!(jittered >= policy.backoff(2));
        assert!(jittered <= policy.backoff(2).mul_f64(1.2));
    }

    #[tokio::test]
    async fn test_recovers_from_transient_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = fast_policy()
            .run("flaky", || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(StorageMarketError::TransientNetwork("reset".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let err = fast_policy()
            .run("reject", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(StorageMarketError::ProviderRejected("no".into()))
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageMarketError::ProviderRejected(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeouts_exhaust_budget() {
        let err = fast_policy()
            .run("hang", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        match err {
            StorageMarketError::RetryBudgetExhausted { operation, attempts, .. } => {
                assert_eq!(operation, "hang");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
