// Retry-with-backoff shared by segment, key, direct and upload transfers.
//
// Exponential backoff with jitter and a max delay cap.

use rand::RngExt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not counting the initial attempt).
    pub max_retries: u32,
    /// Base delay between retries. Actual delay = base * 2^attempt + jitter.
    pub base_delay: Duration,
    /// Hard cap on the computed delay.
    pub max_delay: Duration,
    /// When true, adds random jitter of [0, base_delay/2).
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Compute the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // 2^attempt is computed with a checked shift so attempts >= 32 saturate.
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let exp_delay = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay);
        let capped = exp_delay.min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        // Jitter is limited so the final delay never exceeds `max_delay`.
        let jitter_range_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX) / 2;
        let remaining_ms =
            u64::try_from(self.max_delay.saturating_sub(capped).as_millis()).unwrap_or(0);
        let jitter_limit_ms = jitter_range_ms.min(remaining_ms);
        if jitter_limit_ms == 0 {
            return capped;
        }

        let jitter_ms = rand::rng().random_range(0..jitter_limit_ms);
        (capped + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }
}

/// Result of a single attempt, used by the caller to signal retryability.
pub enum RetryAction<T, E> {
    /// Operation succeeded.
    Success(T),
    /// Operation failed with a retryable error (network, 5xx, timeout).
    Retry(E),
    /// Operation failed with a non-retryable error (4xx, parse error).
    Fail(E),
}

impl<T, E> RetryAction<T, E> {
    /// Map a result through a retryability classifier.
    pub fn from_result(result: Result<T, E>, is_retryable: impl FnOnce(&E) -> bool) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(e) if is_retryable(&e) => Self::Retry(e),
            Err(e) => Self::Fail(e),
        }
    }
}

/// Why [`retry_with_backoff`] gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    Cancelled,
    /// The last error seen, after `attempts` tries.
    Exhausted { error: E, attempts: u32 },
}

impl<E> RetryError<E> {
    /// Collapse into the operation's error type.
    pub fn into_inner(self, cancelled: impl FnOnce() -> E) -> E {
        match self {
            Self::Cancelled => cancelled(),
            Self::Exhausted { error, .. } => error,
        }
    }
}

/// Execute an async operation with retry-and-backoff.
///
/// The `operation` closure receives the current attempt number (0-indexed) and
/// returns a [`RetryAction`] indicating whether the result is a success,
/// retryable failure, or permanent failure.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = RetryAction<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        if token.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        let outcome = tokio::select! {
            _ = token.cancelled() => return Err(RetryError::Cancelled),
            outcome = operation(attempt) => outcome,
        };

        match outcome {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(error) => {
                return Err(RetryError::Exhausted {
                    error,
                    attempts: attempt + 1,
                });
            }
            RetryAction::Retry(error) => {
                if attempt >= policy.max_retries {
                    return Err(RetryError::Exhausted {
                        error,
                        attempts: attempt + 1,
                    });
                }
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    attempt = attempt + 1,
                    max = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying after transient error"
                );
                tokio::select! {
                    _ = token.cancelled() => return Err(RetryError::Cancelled),
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
    use rstest::rstest;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_secs(1),
            jitter: false,
        }
    }

    #[rstest]
    #[case::first(0, 100)]
    #[case::doubles(2, 400)]
    #[case::capped(6, 5_000)]
    #[case::shift_overflow(40, 5_000)]
    fn backoff_doubles_up_to_the_cap(#[case] attempt: u32, #[case] expected_ms: u64) {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: false,
        };
        assert_eq!(policy.delay_for_attempt(attempt), Duration::from_millis(expected_ms));
    }

    #[test]
    fn jitter_stays_within_half_base_and_cap() {
        let policy = RetryPolicy {
            jitter: true,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
            ..RetryPolicy::default()
        };
        for _ in 0..32 {
            let first = policy.delay_for_attempt(0);
            assert!((Duration::from_millis(100)..Duration::from_millis(150)).contains(&first));
            assert!(policy.delay_for_attempt(5) <= Duration::from_millis(250));
        }
    }

    #[tokio::test]
    async fn fails_immediately_on_non_retryable() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, _> =
            retry_with_backoff(&fast(3), &CancellationToken::new(), |_| {
                attempts.fetch_add(1, Ordering::Relaxed);
                async { RetryAction::Fail("404 not found") }
            })
            .await;
        assert!(matches!(
            result,
            Err(RetryError::Exhausted { attempts: 1, .. })
        ));
        assert_eq!(attempts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn exhausts_then_fails() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, _> =
            retry_with_backoff(&fast(2), &CancellationToken::new(), |_| {
                attempts.fetch_add(1, Ordering::Relaxed);
                async { RetryAction::Retry("500 internal") }
            })
            .await;
        assert!(matches!(
            result,
            Err(RetryError::Exhausted { attempts: 3, error: "500 internal" })
        ));
        assert_eq!(attempts.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn succeeds_on_second_attempt() {
        let result = retry_with_backoff(&fast(3), &CancellationToken::new(), |attempt| async move {
            if attempt == 0 {
                RetryAction::Retry("timeout")
            } else {
                RetryAction::Success(99u32)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 99);
    }

    #[tokio::test]
    async fn respects_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let result: Result<u32, RetryError<&str>> =
            retry_with_backoff(&fast(10), &token, |_| async { RetryAction::Success(1u32) }).await;
        assert!(matches!(result, Err(RetryError::Cancelled)));
    }

    #[test]
    fn from_result_classifies() {
        let ok: RetryAction<u8, u8> = RetryAction::from_result(Ok(1), |_| true);
        assert!(matches!(ok, RetryAction::Success(1)));
        let retry: RetryAction<u8, u8> = RetryAction::from_result(Err(5), |e| *e == 5);
        assert!(matches!(retry, RetryAction::Retry(5)));
        let fail: RetryAction<u8, u8> = RetryAction::from_result(Err(4), |e| *e == 5);
        assert!(matches!(fail, RetryAction::Fail(4)));
    }
}
