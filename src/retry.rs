//! Bounded exponential backoff for transient API failures
//!
//! Throttling and transport errors are retried up to the attempt bound with
//! a doubling delay; terminal errors (denials, missing entities) propagate on
//! the first attempt. Callers that own a retry policy wrap individual API
//! calls with [`retry_with_backoff`].

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::aws::ApiError;

/// Attempt bound and initial delay for one class of calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

/// Run `operation`, retrying transient failures with exponential backoff.
///
/// `what` names the call for the log line.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut operation: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut delay = policy.base_delay;
    let mut attempt = 1u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt < policy.max_attempts => {
                warn!(
                    call = what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn throttled() -> ApiError {
        ApiError::Api {
            service: "iam",
            code: "Throttling".to_string(),
            message: "rate exceeded".to_string(),
        }
    }

    fn denied() -> ApiError {
        ApiError::Api {
            service: "iam",
            code: "AccessDenied".to_string(),
            message: "no".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried_until_success() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);

        let result = retry_with_backoff(&policy, "ListRoles", || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(throttled())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_failure_not_retried() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);

        let result: Result<(), _> = retry_with_backoff(&policy, "GetRole", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move { Err(denied()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_bound_exhausted() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(10),
        };
        let attempts = AtomicU32::new(0);

        let result: Result<(), _> = retry_with_backoff(&policy, "DescribeStacks", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move { Err(throttled()) }
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }
}
