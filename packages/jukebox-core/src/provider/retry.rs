//! Retry logic for transient provider errors.
//!
//! Provides exponential backoff for idempotent provider reads that fail with
//! transient errors (expired token, rate limit, timeout, 5xx).

use std::time::Duration;

use super::api::ProviderResult;

/// Retry delays for transient provider errors (exponential backoff).
const RETRY_DELAYS_MS: [u64; 3] = [200, 500, 1000];

/// Executes a provider read with retry logic for transient errors.
///
/// Only use this for idempotent requests. Mutations go through once.
///
/// # Arguments
/// * `action` - Action name for logging
/// * `operation` - Closure that performs the request
pub(crate) async fn with_retry<T, F, Fut>(action: &str, mut operation: F) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ProviderResult<T>>,
{
    let mut last_error = None;
    for (attempt, &delay_ms) in std::iter::once(&0)
        .chain(RETRY_DELAYS_MS.iter())
        .enumerate()
    {
        if attempt > 0 {
            log::info!(
                "[Spotify] Retrying {} (attempt {}/{}) after {}ms",
                action,
                attempt + 1,
                RETRY_DELAYS_MS.len() + 1,
                delay_ms
            );
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        match operation().await {
            Ok(r) => return Ok(r),
            Err(e) if e.is_transient() => {
                log::warn!("[Spotify] {} transient error: {}", action, e);
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    // The loop runs at least once, so a transient error was recorded.
    Err(last_error.unwrap_or(super::api::ProviderError::Timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::api::ProviderError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicUsize::new(0);
        let result = with_retry("test", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(ProviderError::RateLimited {
                    retry_after_secs: None,
                })
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: ProviderResult<()> = with_retry("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::NotFound("x".into()))
        })
        .await;

        assert!(matches!(result, Err(ProviderError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_all_delays() {
        let calls = AtomicUsize::new(0);
        let result: ProviderResult<()> = with_retry("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::NoActiveDevice)
        })
        .await;

        assert!(matches!(result, Err(ProviderError::NoActiveDevice)));
        assert_eq!(calls.load(Ordering::SeqCst), RETRY_DELAYS_MS.len() + 1);
    }
}
