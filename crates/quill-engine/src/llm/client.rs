use super::error::{map_reqwest_error, ModelError};
use super::models::{ChatMessage, Completion, CompletionOptions, FinishReason, Usage, DEFAULT_MODEL};
use super::retry::{parse_retry_after, parse_retry_after_header, with_retry, RetryPolicy};
use super::sse::decode_events;
use super::DeltaStream;
use quill_core::util::truncate_str;
use quill_core::BoxFuture;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// OpenRouter's OpenAI-compatible API.
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Maximum length for error content in error messages
const MAX_ERROR_CONTENT_LEN: usize = 200;
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// A chat-completion backend. The engine only ever talks to this trait.
pub trait ModelClient: Send + Sync {
    /// Model used when a call does not override it.
    fn model_id(&self) -> &str;

    /// One non-streaming call, with transient failures retried.
    fn complete<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        options: &'a CompletionOptions,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Completion, ModelError>>;

    /// Open a streaming call. Retries cover establishing the stream; a
    /// stream that fails midway surfaces the error as its last item.
    fn stream<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        options: &'a CompletionOptions,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<DeltaStream, ModelError>>;
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Total timeout for non-streaming calls.
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    /// Content can be null when a refusal or upstream error occurs.
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

/// Error envelope; some providers send it with a 200 status.
#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
    #[serde(default)]
    code: Option<u16>,
}

/// OpenAI-compatible HTTP client.
pub struct HttpModelClient {
    http: reqwest::Client,
    settings: ClientSettings,
}

impl HttpModelClient {
    pub fn new(settings: ClientSettings) -> Result<Self, ModelError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ModelError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { http, settings })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }

    async fn send(&self, body: &ChatRequest<'_>) -> Result<reqwest::Response, ModelError> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ModelError::MissingApiKey)?;

        let mut request = self
            .http
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .header("HTTP-Referer", "https://github.com/quill-editor/quill")
            .header("X-Title", "Quill")
            .bearer_auth(api_key)
            .json(body);
        if !body.stream {
            request = request.timeout(self.settings.request_timeout);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let headers = response.headers().clone();
        let text = response.text().await.unwrap_or_default();
        Err(status_error(status, &headers, &text))
    }

    async fn complete_once(&self, body: &ChatRequest<'_>) -> Result<Completion, ModelError> {
        let response = self.send(body).await?;
        let text = response.text().await.map_err(map_reqwest_error)?;
        parse_completion(&text)
    }

    fn request_body<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        options: &'a CompletionOptions,
        stream: bool,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model: options.model.as_deref().unwrap_or(&self.settings.model),
            messages,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            stream,
        }
    }
}

impl ModelClient for HttpModelClient {
    fn model_id(&self) -> &str {
        &self.settings.model
    }

    fn complete<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        options: &'a CompletionOptions,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Completion, ModelError>> {
        Box::pin(async move {
            let body = self.request_body(messages, options, false);
            tracing::debug!(model = body.model, max_tokens = body.max_tokens, "model call");
            with_retry(&self.settings.retry, cancel, || self.complete_once(&body)).await
        })
    }

    fn stream<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        options: &'a CompletionOptions,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<DeltaStream, ModelError>> {
        Box::pin(async move {
            let body = self.request_body(messages, options, true);
            tracing::debug!(model = body.model, max_tokens = body.max_tokens, "streaming model call");
            let response = with_retry(&self.settings.retry, cancel, || self.send(&body)).await?;
            Ok(decode_events(Box::pin(response.bytes_stream())))
        })
    }
}

fn status_error(status: StatusCode, headers: &HeaderMap, body: &str) -> ModelError {
    match status.as_u16() {
        401 | 403 => ModelError::Auth(format!("HTTP {}", status.as_u16())),
        429 => ModelError::RateLimited {
            retry_after: parse_retry_after_header(headers).or_else(|| parse_retry_after(body)),
        },
        code => {
            let message = serde_json::from_str::<ApiErrorEnvelope>(body)
                .map(|env| env.error.message)
                .unwrap_or_else(|_| body.to_string());
            ModelError::Api {
                status: code,
                message: sanitize_api_response(&message),
            }
        }
    }
}

fn parse_completion(text: &str) -> Result<Completion, ModelError> {
    if let Ok(envelope) = serde_json::from_str::<ApiErrorEnvelope>(text) {
        let status = envelope.error.code.unwrap_or(500);
        return Err(if status == 429 {
            ModelError::RateLimited { retry_after: None }
        } else {
            ModelError::Api {
                status,
                message: sanitize_api_response(&envelope.error.message),
            }
        });
    }

    let response: ChatResponse = serde_json::from_str(text).map_err(|e| {
        ModelError::Decode(format!("{e}: {}", sanitize_api_response(text)))
    })?;
    let Some(choice) = response.choices.into_iter().next() else {
        return Err(ModelError::EmptyResponse);
    };
    if let Some(refusal) = choice.message.refusal.filter(|r| !r.trim().is_empty()) {
        return Err(ModelError::Refused(refusal));
    }
    let content = choice.message.content.unwrap_or_default();
    if content.trim().is_empty() {
        return Err(ModelError::EmptyResponse);
    }

    Ok(Completion {
        text: content,
        finish_reason: FinishReason::from_api(choice.finish_reason.as_deref()),
        usage: response.usage,
    })
}

/// Trim provider error bodies for display, hiding anything key-shaped.
fn sanitize_api_response(content: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "api_key",
        "apikey",
        "secret",
        "password",
        "credential",
        "bearer",
        "sk-",
    ];

    let truncated = truncate_str(content, MAX_ERROR_CONTENT_LEN);
    let lower = truncated.to_lowercase();
    if SECRET_PATTERNS.iter().any(|p| lower.contains(p)) {
        return "(response details redacted - may contain sensitive data)".to_string();
    }
    truncated.to_string()
}
