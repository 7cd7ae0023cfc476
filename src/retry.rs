//! Bounded retry around remote calls.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, warn};

use crate::config::ForceRetryConfig;
use crate::types::error::{RetryExhausted, RetryTarget, is_retryable_error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, at least 1.
    pub retry_times: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(retry_times: u32, interval: Duration) -> Self {
        Self {
            retry_times: retry_times.max(1),
            interval,
        }
    }

    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&ForceRetryConfig::default())
    }
}

impl From<&ForceRetryConfig> for RetryPolicy {
    fn from(config: &ForceRetryConfig) -> Self {
        RetryPolicy::new(
            config.retry_times,
            Duration::from_millis(config.retry_interval_milliseconds),
        )
    }
}

/// Calls `op` until it succeeds, fails with a non-retryable error, or
/// `policy.retry_times` attempts were made. The last error carries a [`RetryExhausted`] context
/// naming `target`.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, target: RetryTarget, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.retry_times.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(retry_target = %target, attempt = attempt, "remote call succeeded after retry.");
                }
                return Ok(value);
            }
            Err(e) => {
                if attempt >= max_attempts || !is_retryable_error(&e) {
                    return Err(e.context(RetryExhausted {
                        target,
                        attempts: attempt,
                    }));
                }

                warn!(
                    retry_target = %target,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    "remote call failed. retrying: {e:#}"
                );
                if !policy.interval.is_zero() {
                    tokio::time::sleep(policy.interval).await;
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_dummy_tracing_subscriber;
    use crate::types::error::{StorageError, is_fatal_error};
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn target() -> RetryTarget {
        RetryTarget::object("bucket", "key")
    }

    #[tokio::test]
    async fn returns_first_success() {
        init_dummy_tracing_subscriber();

        let calls = AtomicU32::new(0);
        let result = with_retry(&RetryPolicy::new(3, Duration::ZERO), target(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(7)
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        init_dummy_tracing_subscriber();

        let calls = AtomicU32::new(0);
        let result = with_retry(&RetryPolicy::new(5, Duration::ZERO), target(), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(anyhow!(StorageError::new("InternalError", "try again", Some(500))))
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_retry_times_attempts() {
        init_dummy_tracing_subscriber();

        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&RetryPolicy::new(4, Duration::ZERO), target(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!(StorageError::new("SlowDown", "reduce rate", Some(503))))
        })
        .await;

        let e = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let exhausted = e.downcast_ref::<RetryExhausted>().unwrap();
        assert_eq!(exhausted.attempts, 4);
        assert_eq!(exhausted.target, target());
        assert_eq!(e.downcast_ref::<StorageError>().unwrap().code, "SlowDown");
    }

    #[tokio::test]
    async fn permanent_errors_stop_early() {
        init_dummy_tracing_subscriber();

        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&RetryPolicy::new(10, Duration::ZERO), target(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!(StorageError::new("AccessDenied", "denied", Some(403))))
        })
        .await;

        let e = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(is_fatal_error(&e));
        assert_eq!(e.downcast_ref::<RetryExhausted>().unwrap().attempts, 1);
    }

    async fn recovers_from(code: &str, status: u16) {
        let calls = AtomicU32::new(0);
        let result = with_retry(&RetryPolicy::new(5, Duration::ZERO), target(), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(anyhow!(StorageError::new(code, "transient", Some(status))))
            } else {
                Ok(())
            }
        })
        .await;

        assert!(result.is_ok(), "{code} {status}");
        assert_eq!(calls.load(Ordering::SeqCst), 3, "{code} {status}");
    }

    #[tokio::test]
    async fn throttling_and_request_timeouts_are_retried() {
        init_dummy_tracing_subscriber();

        recovers_from("TooManyRequests", 429).await;
        recovers_from("RequestTimeout", 400).await;
        recovers_from("RequestTimeout", 408).await;
    }

    #[tokio::test]
    async fn invalid_requests_stop_early() {
        init_dummy_tracing_subscriber();

        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&RetryPolicy::new(10, Duration::ZERO), target(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!(StorageError::new("InvalidArgument", "bad header", Some(400))))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_retry_times_still_attempts_once() {
        init_dummy_tracing_subscriber();

        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            retry_times: 0,
            interval: Duration::ZERO,
        };
        let result: Result<()> = with_retry(&policy, RetryTarget::bucket("bucket"), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("connection reset"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn policy_from_config() {
        let policy = RetryPolicy::from(&ForceRetryConfig {
            retry_times: 0,
            retry_interval_milliseconds: 250,
        });
        assert_eq!(policy.retry_times, 1);
        assert_eq!(policy.interval, Duration::from_millis(250));
    }
}
