//! Backoff for transient model API failures.

use super::error::ModelError;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const MAX_RETRIES: u32 = 3;
pub const INITIAL_BACKOFF_MS: u64 = 500;
pub const BACKOFF_MULTIPLIER: u32 = 2;
pub const MAX_BACKOFF_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_secs(MAX_BACKOFF_SECS),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry_count` (1-based). A server hint is a
    /// floor, never a ceiling; the cap applies to both.
    pub fn delay_for(&self, retry_count: u32, retry_after: Option<Duration>) -> Duration {
        let factor = BACKOFF_MULTIPLIER.saturating_pow(retry_count.saturating_sub(1));
        let backoff = self.initial_backoff.saturating_mul(factor);
        let delay = retry_after.map_or(backoff, |hint| hint.max(backoff));
        delay.min(self.max_backoff)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy runs out. Cancellation interrupts both the call and the sleep.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, ModelError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ModelError>>,
{
    let mut retry_count = 0;
    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ModelError::Cancelled),
            result = op() => result,
        };
        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && retry_count < policy.max_retries => {
                retry_count += 1;
                let delay = policy.delay_for(retry_count, err.retry_after());
                tracing::warn!(
                    error = %err,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "model call failed, retrying"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ModelError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => return Err(err),
        }
    }
}

/// Extract a retry hint from an error body ("retry after 12 seconds").
pub fn parse_retry_after(text: &str) -> Option<Duration> {
    let text_lower = text.to_lowercase();
    let pos = text_lower.find("retry")?;
    text_lower[pos..]
        .split_whitespace()
        .skip(1)
        .take(5)
        .filter_map(|word| {
            word.trim_matches(|c: char| !c.is_numeric())
                .parse::<u64>()
                .ok()
        })
        .find(|secs| *secs > 0 && *secs < 300)
        .map(Duration::from_secs)
}

/// Retry-After header in delta-seconds form.
pub fn parse_retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    let secs = headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()?;
    (secs > 0 && secs < 300).then(|| Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1, None), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2, None), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3, None), Duration::from_millis(2000));
    }

    #[test]
    fn test_retry_after_is_a_floor_and_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for(1, Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
        assert_eq!(
            policy.delay_for(3, Some(Duration::from_millis(10))),
            Duration::from_millis(2000)
        );
        assert_eq!(
            policy.delay_for(1, Some(Duration::from_secs(250))),
            Duration::from_secs(MAX_BACKOFF_SECS)
        );
    }

    #[test]
    fn test_parse_retry_after_body() {
        assert_eq!(
            parse_retry_after("Rate limited. Retry after 12 seconds."),
            Some(Duration::from_secs(12))
        );
        assert_eq!(parse_retry_after("slow down"), None);
        assert_eq!(parse_retry_after("retry in 900 seconds"), None);
    }

    #[test]
    fn test_parse_retry_after_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after_header(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after_header(&headers), Some(Duration::from_secs(7)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after_header(&headers), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_recovers_from_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&RetryPolicy::default(), &CancellationToken::new(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ModelError::Timeout)
                } else {
                    Ok("ok")
                }
            }
        })
        .await;
        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_gives_up_after_ceiling() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> =
            with_retry(&RetryPolicy::default(), &CancellationToken::new(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ModelError::RateLimited { retry_after: None }) }
            })
            .await;
        assert_eq!(result, Err(ModelError::RateLimited { retry_after: None }));
        assert_eq!(calls.load(Ordering::SeqCst), MAX_RETRIES + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_never_retries_auth() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> =
            with_retry(&RetryPolicy::default(), &CancellationToken::new(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ModelError::Auth("401".into())) }
            })
            .await;
        assert!(matches!(result, Err(ModelError::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_honors_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> = with_retry(&RetryPolicy::default(), &cancel, || async {
            Err(ModelError::Timeout)
        })
        .await;
        assert_eq!(result, Err(ModelError::Cancelled));
    }
}
