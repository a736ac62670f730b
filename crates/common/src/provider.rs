//! Shared plumbing for the provider contracts
//!
//! The identity, DAG, p2p and pubsub providers all fail with the same
//! [`ProviderError`], so callers can tell a timeout apart from a missing
//! block or a backend that never came up regardless of which provider they
//! were talking to.

use std::future::Future;
use std::time::Duration;

use crate::linked_data::LinkedDataError;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("linked data error: {0}")]
    LinkedData(#[from] LinkedDataError),
    #[error("provider error: {0}")]
    Default(#[from] anyhow::Error),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ProviderError::Timeout(_))
    }
}

/// Run a provider call under a deadline
pub async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(timeout)),
    }
}

/// Poll `attempt` every `interval` until it yields a value or `deadline`
/// elapses.
///
/// Errors from an attempt are returned immediately; only `Ok(None)` is
/// retried.
pub async fn retry_until<T, F, Fut>(
    deadline: Duration,
    interval: Duration,
    mut attempt: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, ProviderError>>,
{
    let start = tokio::time::Instant::now();
    loop {
        if let Some(value) = attempt().await? {
            return Ok(value);
        }
        if start.elapsed() >= deadline {
            return Err(ProviderError::Timeout(deadline));
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_elapses() {
        let result: Result<(), _> = with_timeout(Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ProviderError::Timeout(d)) if d == Duration::from_millis(50)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_succeeds() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let value = retry_until(Duration::from_secs(1), Duration::from_millis(10), || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok((n >= 3).then_some(n))
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_is_bounded() {
        let result: Result<(), _> =
            retry_until(Duration::from_millis(100), Duration::from_millis(10), || async {
                Ok(None)
            })
            .await;
        assert!(result.unwrap_err().is_timeout());
    }
}
