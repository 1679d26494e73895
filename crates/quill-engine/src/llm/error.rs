use std::time::Duration;
use thiserror::Error;

/// Failures talking to the model API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("could not reach the model API: {0}")]
    Network(String),
    #[error("model request timed out")]
    Timeout,
    #[error("rate limited by the model API")]
    RateLimited { retry_after: Option<Duration> },
    #[error("authentication failed ({0}). Check your API key with `quill config set api_key <KEY>`")]
    Auth(String),
    #[error("no API key configured. Set QUILL_API_KEY or run `quill config set api_key <KEY>`")]
    MissingApiKey,
    #[error("model API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("model returned an empty response")]
    EmptyResponse,
    #[error("model refused the request: {0}")]
    Refused(String),
    #[error("could not decode model response: {0}")]
    Decode(String),
    #[error("request cancelled")]
    Cancelled,
}

impl ModelError {
    /// Transient failures worth another attempt after a backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelError::Network(_) | ModelError::Timeout | ModelError::RateLimited { .. } => true,
            ModelError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ModelError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Failures no amount of re-prompting fixes: the request itself is
    /// wrong or was refused, so another round would fail the same way.
    pub fn is_fatal(&self) -> bool {
        match self {
            ModelError::Auth(_)
            | ModelError::MissingApiKey
            | ModelError::Cancelled
            | ModelError::Refused(_) => true,
            ModelError::Api { status, .. } => *status < 500 && *status != 429,
            _ => false,
        }
    }
}

pub(crate) fn map_reqwest_error(err: reqwest::Error) -> ModelError {
    if err.is_timeout() {
        ModelError::Timeout
    } else if err.is_connect() || err.is_request() || err.is_body() {
        ModelError::Network(err.to_string())
    } else {
        ModelError::Decode(err.to_string())
    }
}
