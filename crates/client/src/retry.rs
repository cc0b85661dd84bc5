//! Exponential-backoff retry for API calls.
//!
//! [`api_call`] is the single network entry point of the persistence
//! layer: it sends a request through a [`Transport`], turns non-2xx
//! responses into [`ClientError::Api`], and repeats retryable failures
//! after `base * 2^attempt` delays. Terminal failures are returned at
//! once without consuming the retry budget.

use std::future::Future;
use std::time::Duration;

use crate::error::ClientError;
use crate::transport::{ApiRequest, ApiResponse, Transport};

/// Retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Delay before the first retry; doubles for each subsequent one.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Tunable parameters for the backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt + 1` (`attempt` is zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Run `op` until it succeeds, fails terminally, or the retry budget is
/// spent. The last error is returned when retries run out.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut attempt = 0u32;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(operation, retries = attempt, "API call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                attempt += 1;
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying API call",
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        operation,
                        retries = attempt,
                        error = %e,
                        "API call failed after exhausting retries",
                    );
                } else {
                    tracing::debug!(operation, error = %e, "API call failed with terminal error");
                }
                return Err(e);
            }
        }
    }
}

/// Send `request` through `transport` under `policy`.
///
/// Returns the successful (2xx) response. Non-2xx responses are
/// classified by status: 5xx, 408 and 429 are retried, anything else is
/// returned immediately.
pub async fn api_call(
    transport: &dyn Transport,
    policy: &RetryPolicy,
    request: &ApiRequest,
) -> Result<ApiResponse, ClientError> {
    let operation = format!("{} {}", request.method, request.path);
    with_retry(policy, &operation, move || async move {
        transport.send(request).await?.ensure_success()
    })
    .await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::time::Instant;

    use super::*;

    fn server_error() -> ClientError {
        ClientError::Api {
            status: 503,
            message: "unavailable".into(),
        }
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (0..4).map(|a| policy.delay_for(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000]);
    }

    #[test]
    fn delay_saturates_instead_of_overflowing() {
        let policy = RetryPolicy::default();
        assert!(policy.delay_for(64) >= policy.delay_for(31));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_two_server_errors_with_exponential_delays() {
        let calls = AtomicU32::new(0);
        let mut call_times = Vec::new();
        let start = Instant::now();

        let result = with_retry(&RetryPolicy::default(), "test", || {
            call_times.push(start.elapsed());
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(server_error())
                } else {
                    Ok("saved")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("saved"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            call_times,
            vec![
                Duration::ZERO,
                Duration::from_millis(1000),
                Duration::from_millis(3000),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<(), _> = with_retry(&RetryPolicy::default(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ClientError::Api {
                    status: 404,
                    message: "Project not found".into(),
                })
            }
        })
        .await;

        assert_eq!(result.unwrap_err().status(), Some(404));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_retries_returns_last_error() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(&RetryPolicy::default(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Err(ClientError::Api {
                    status: 500 + n as u16,
                    message: format!("failure {n}"),
                })
            }
        })
        .await;

        // One initial attempt plus three retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(result.unwrap_err().status(), Some(503));
    }

    #[tokio::test(start_paused = true)]
    async fn policy_without_retries_makes_one_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&RetryPolicy::none(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(server_error()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
