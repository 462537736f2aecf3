//! Bounded retry with exponential backoff for transport requests.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::AgentError;

/// Outcome of one failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    /// Connection refused, timeout or server-side error; worth another try.
    Transient {
        /// Failure description.
        reason: String,
    },
    /// Not retried; returned as-is.
    Fatal(AgentError),
}

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Growth factor per retry.
    pub multiplier: u32,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            multiplier: 2,
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Default backoff with the given retry count.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Runs `op` until it succeeds, fails fatally, or runs out of retries.
///
/// Exhaustion is reported as [`AgentError::Unreachable`] for `endpoint`.
/// The backoff sleeps are plain `tokio` sleeps, so an enclosing
/// `tokio::time::timeout` cancels them.
pub async fn retry<T, Op, Fut>(policy: &RetryPolicy, endpoint: &str, mut op: Op) -> Result<T, AgentError>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(AttemptError::Fatal(err)) => return Err(err),
            Err(AttemptError::Transient { reason }) => {
                if attempt >= policy.max_retries {
                    warn!(endpoint, attempts = attempt + 1, reason = %reason, "retries exhausted");
                    return Err(AgentError::Unreachable {
                        endpoint: endpoint.to_string(),
                        attempts: attempt + 1,
                        reason,
                    });
                }

                let delay = policy.delay_for(attempt);
                debug!(
                    endpoint,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    reason = %reason,
                    "retry backoff"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            multiplier: 2,
            max_backoff: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(10), Duration::from_secs(8));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = retry(&fast_policy(3), "http://test", move |_| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AttemptError::Transient {
                        reason: "connection refused".to_string(),
                    })
                } else {
                    Ok("ok")
                }
            }
        })
        .await;
        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_is_unreachable() {
        let result: Result<(), _> = retry(&fast_policy(2), "http://test", |_| async {
            Err(AttemptError::Transient {
                reason: "timeout".to_string(),
            })
        })
        .await;
        assert_eq!(
            result,
            Err(AgentError::Unreachable {
                endpoint: "http://test".to_string(),
                attempts: 3,
                reason: "timeout".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_fatal_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<(), _> = retry(&fast_policy(5), "http://test", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Err(AttemptError::Fatal(AgentError::ServerRejected {
                    status: 400,
                    body: "bad request".to_string(),
                }))
            }
        })
        .await;
        assert!(matches!(result, Err(AgentError::ServerRejected { status: 400, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_retries_means_one_attempt() {
        let result: Result<(), _> = retry(&fast_policy(0), "http://test", |_| async {
            Err(AttemptError::Transient {
                reason: "refused".to_string(),
            })
        })
        .await;
        assert!(matches!(result, Err(AgentError::Unreachable { attempts: 1, .. })));
    }
}
