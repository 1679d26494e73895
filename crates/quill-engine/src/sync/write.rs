use quill_core::{DocumentError, DocumentHandle, TextRange};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const WRITE_ATTEMPTS: u32 = 4;
pub const WRITE_RETRY_DELAY_MS: u64 = 50;

/// Fixed-delay retry for edits the host rejects while busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritePolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            attempts: WRITE_ATTEMPTS,
            delay: Duration::from_millis(WRITE_RETRY_DELAY_MS),
        }
    }
}

/// Replace `range` with `text`, retrying rejected edits.
pub async fn replace_with_retry(
    document: &dyn DocumentHandle,
    range: TextRange,
    text: &str,
    policy: WritePolicy,
    cancel: &CancellationToken,
) -> Result<(), DocumentError> {
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(DocumentError::Cancelled);
        }
        if document.replace(range, text).await {
            return Ok(());
        }
        tracing::debug!(
            uri = document.uri(),
            attempt,
            start = range.start,
            end = range.end,
            "document rejected edit"
        );
        if attempt < attempts {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DocumentError::Cancelled),
                _ = tokio::time::sleep(policy.delay) => {}
            }
        }
    }
    Err(DocumentError::Rejected {
        uri: document.uri().to_string(),
        attempts,
    })
}
