use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Classification of a failure as seen by the retry harness. A distinct,
/// narrower taxonomy than the application-wide error type: only these four
/// classes participate in retry/backoff decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    RateLimit,
    Network,
    Permanent,
}

impl ErrorClass {
    fn is_retriable(self) -> bool {
        !matches!(self, ErrorClass::Permanent)
    }
}

/// A call site's retry configuration.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay before attempt `k` (1-based), per class.
    pub fn delay_for(&self, attempt: u32, class: ErrorClass) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let mut delay = Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()));
        if class == ErrorClass::RateLimit {
            delay = std::cmp::min(delay * 2, self.max_delay);
        }
        delay
    }
}

/// Errors the retry harness itself can surface, distinct from the wrapped
/// call's own error type.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Exhausted(E),
    #[error(transparent)]
    Permanent(E),
}

/// Runs `f` under `policy`, classifying each failure with `classify` and
/// waiting the computed backoff between attempts. Non-retriable
/// (`Permanent`) classifications abort immediately. `cancelled` is polled
/// before each attempt and each wait; when it returns `true` the harness
/// returns `RetryError::Cancelled` without another attempt.
pub async fn retry<F, Fut, T, E>(
    policy: &BackoffPolicy,
    classify: impl Fn(&E) -> ErrorClass,
    cancelled: impl Fn() -> bool,
    mut f: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        if cancelled() {
            return Err(RetryError::Cancelled);
        }

        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let class = classify(&err);
                if !class.is_retriable() {
                    return Err(RetryError::Permanent(err));
                }
                if attempt >= policy.max_attempts {
                    return Err(RetryError::Exhausted(err));
                }

                let delay = policy.delay_for(attempt, class);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = BackoffPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
        };
        assert_eq!(policy.delay_for(1, ErrorClass::Transient), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2, ErrorClass::Transient), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3, ErrorClass::Transient), Duration::from_millis(400));
        assert_eq!(policy.delay_for(10, ErrorClass::Transient), Duration::from_secs(2));
    }

    #[test]
    fn rate_limit_doubles_delay() {
        let policy = BackoffPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
        };
        assert_eq!(
            policy.delay_for(1, ErrorClass::RateLimit),
            Duration::from_millis(200)
        );
    }

    #[tokio::test]
    async fn permanent_failure_aborts_without_retry() {
        let policy = BackoffPolicy::default();
        let mut calls = 0;
        let result: Result<(), RetryError<&str>> = retry(
            &policy,
            |_| ErrorClass::Permanent,
            || false,
            || {
                calls += 1;
                async { Err("boom") }
            },
        )
        .await;
        assert!(matches!(result, Err(RetryError::Permanent("boom"))));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn transient_failure_retries_until_success() {
        let policy = BackoffPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_factor: 1.0,
        };
        let mut calls = 0;
        let result: Result<&str, RetryError<&str>> = retry(
            &policy,
            |_| ErrorClass::Transient,
            || false,
            || {
                calls += 1;
                let attempt = calls;
                async move {
                    if attempt < 3 {
                        Err("retry me")
                    } else {
                        Ok("done")
                    }
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls, 3);
    }
}
