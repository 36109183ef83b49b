//! Bounded retry with exponential backoff around one stage invocation.

use std::future::Future;
use std::time::Duration;

use heritix_shared::{AgentError, RetryConfig, RetryPolicy, Stage};
use tracing::warn;

/// Runs a fallible async operation up to `max_attempts` times.
///
/// Logging attempts to the audit trail is the caller's job; the executor only
/// re-invokes and sleeps.
#[derive(Debug, Clone, Copy)]
pub struct StageExecutor {
    retry: RetryConfig,
}

impl StageExecutor {
    pub fn new(retry: RetryConfig) -> Self {
        Self { retry }
    }

    /// Invoke `op` until it succeeds, fails non-retryably, or attempts run out.
    ///
    /// Returns the last error on terminal failure.
    pub async fn run<T, F, Fut>(&self, stage: Stage, mut op: F) -> Result<T, AgentError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let hint = match err.retry_policy() {
                RetryPolicy::NonRetryable => {
                    warn!(%stage, attempt, error = %err, "stage failed, not retryable");
                    return Err(err);
                }
                RetryPolicy::Retryable { after } => after,
            };

            if attempt >= max_attempts {
                warn!(%stage, attempt, error = %err, "stage failed, attempts exhausted");
                return Err(err);
            }

            let delay = self.delay_after(attempt, hint);
            warn!(
                %stage,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "stage failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Backoff after the given failed attempt, raised to the service's hint and capped.
    fn delay_after(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let scheduled = self.retry.backoff_for(attempt);
        hint.map_or(scheduled, |h| scheduled.max(h))
            .min(self.retry.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_executor(max_attempts: u32) -> StageExecutor {
        StageExecutor::new(RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        })
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = fast_executor(3)
            .run(Stage::Extraction, || {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(AgentError::transient(format!("attempt {n}")))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn returns_last_error_when_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let err = fast_executor(3)
            .run(Stage::Categorization, || {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Err::<(), _>(AgentError::transient(format!("attempt {n}")))
                }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(err.to_string().contains("attempt 3"));
    }

    #[tokio::test]
    async fn non_retryable_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let err = fast_executor(3)
            .run(Stage::Education, || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(AgentError::fatal("401"))
                }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, AgentError::Fatal { .. }));
    }

    #[test]
    fn delay_honours_hint_within_cap() {
        let executor = StageExecutor::new(RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        });
        assert_eq!(executor.delay_after(1, None), Duration::from_secs(2));
        assert_eq!(executor.delay_after(2, None), Duration::from_secs(4));
        assert_eq!(
            executor.delay_after(1, Some(Duration::from_secs(7))),
            Duration::from_secs(7)
        );
        assert_eq!(
            executor.delay_after(1, Some(Duration::from_secs(60))),
            Duration::from_secs(10)
        );
    }
}
