use std::future::Future;

use crate::config::RetryPolicy;

/// Whether a failed call is worth retrying. Validation/logic errors
/// short-circuit; only classified-transient errors (I/O timeouts, transport
/// failures) are retried (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
}

/// Drives `action` through up to `policy.max_retry_attempts` attempts,
/// sleeping `policy.delay_for_attempt(n)` between them. Stops immediately on
/// a permanent error or once attempts are exhausted, returning the last
/// error observed.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    classify: impl Fn(&E) -> ErrorClass,
    mut action: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match action().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let exhausted = attempt >= policy.max_retry_attempts;
                if exhausted || classify(&err) == ErrorClass::Permanent {
                    return Err(err);
                }
                tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn retries_transient_errors_up_to_the_attempt_cap() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default()
            .with_max_retry_attempts(3)
            .with_retry_delay(Duration::from_millis(1));

        let result: Result<(), &str> = retry_with_backoff(
            &policy,
            |_| ErrorClass::Transient,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("boom") }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default().with_retry_delay(Duration::from_millis(1));

        let result: Result<(), &str> = retry_with_backoff(
            &policy,
            |_| ErrorClass::Permanent,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("invalid") }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_without_retry_on_first_attempt() {
        let policy = RetryPolicy::default();
        let result = retry_with_backoff(&policy, |_: &&str| ErrorClass::Transient, || async {
            Ok::<_, &str>(42)
        })
        .await;
        assert_eq!(result, Ok(42));
    }
}
