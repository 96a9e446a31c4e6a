use crate::config::PipelineSettings;
use crate::errors::AppError;
use std::future::Future;
use std::time::Duration;

/// Bounded retry for external calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    /// Delay before the first retry; doubles each time.
    pub initial_backoff: Duration,
    /// Upper bound for a single attempt.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(500),
            timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            timeout: settings.call_timeout(),
            ..Self::default()
        }
    }
}

/// Runs `op` until it succeeds, fails with a non-transient error, or the retry
/// budget is spent. Each attempt is bounded by `policy.timeout`; a timeout counts
/// as a transient failure.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut backoff = policy.initial_backoff;
    let mut attempt = 0;

    loop {
        let outcome = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(AppError::TransientFetch(format!(
                "{} timed out after {:?}",
                label, policy.timeout
            ))),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                tracing::warn!(
                    "{} failed, retrying in {:?} (attempt {}/{}): {}",
                    label,
                    backoff,
                    attempt,
                    policy.max_retries,
                    e
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = with_retry(&fast_policy(2), "search", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(AppError::TransientFetch("503".into()))
            } else {
                Ok("hits")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "hits");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = with_retry(&fast_policy(1), "search", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(AppError::TransientFetch("503".into()))
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn format_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = with_retry(&fast_policy(3), "matching", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(AppError::oracle_format("matching", "no JSON", "prose"))
        })
        .await;

        assert!(matches!(result, Err(AppError::OracleFormat { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_attempts_time_out_as_transient() {
        let policy = RetryPolicy {
            max_retries: 0,
            initial_backoff: Duration::from_millis(1),
            timeout: Duration::from_millis(10),
        };
        let result: Result<(), _> = with_retry(&policy, "crawl", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(result.unwrap_err().is_transient());
    }
}
