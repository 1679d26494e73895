//! Multi-round generation for output that stops before it is done.
//!
//! Round one sends the original prompt. Later rounds re-send the tail of what
//! was produced as the assistant's turn and ask the model to carry on; every
//! round is merged with the overlap-safe appender so echoed text is dropped.

use crate::llm::models::merge_usage;
use crate::llm::{
    ChatMessage, CompletionOptions, FinishReason, ModelClient, ModelError, StreamEvent, Usage,
};
use crate::prompts::continuation_messages;
use futures::StreamExt;
use quill_core::util::estimate_tokens;
use quill_core::{append_with_overlap, looks_incomplete, ContentKind};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_ROUNDS: u32 = 4;
pub const MIN_OUTPUT_TOKENS: u32 = 1_500;
pub const SAFETY_MARGIN_TOKENS: u32 = 1_000;
/// Per-message framing overhead in the token estimate.
const MESSAGE_OVERHEAD_TOKENS: u32 = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct ContinuationSettings {
    pub max_rounds: u32,
    pub max_output_tokens: u32,
    pub min_output_tokens: u32,
    pub safety_margin_tokens: u32,
    pub context_window_tokens: u32,
    pub temperature: f32,
    pub model: Option<String>,
    /// Content kind for the truncation heuristic; `None` trusts the
    /// provider's finish reason alone.
    pub completeness: Option<ContentKind>,
}

impl Default for ContinuationSettings {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            max_output_tokens: 16_000,
            min_output_tokens: MIN_OUTPUT_TOKENS,
            safety_margin_tokens: SAFETY_MARGIN_TOKENS,
            context_window_tokens: crate::llm::models::DEFAULT_CONTEXT_WINDOW_TOKENS,
            temperature: 0.2,
            model: None,
            completeness: None,
        }
    }
}

/// Output budget for one call: what fits in the window after the input and
/// a safety margin, capped by the configured maximum, never below the floor.
pub fn output_budget(settings: &ContinuationSettings, input_tokens: u32) -> u32 {
    let available = settings
        .context_window_tokens
        .saturating_sub(input_tokens)
        .saturating_sub(settings.safety_margin_tokens);
    settings
        .max_output_tokens
        .min(available)
        .max(settings.min_output_tokens)
}

pub fn estimate_message_tokens(messages: &[ChatMessage]) -> u32 {
    messages
        .iter()
        .map(|m| estimate_tokens(&m.content).saturating_add(MESSAGE_OVERHEAD_TOKENS))
        .fold(0u32, u32::saturating_add)
}

/// Everything produced for one generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledOutput {
    pub text: String,
    /// Model calls issued.
    pub rounds: u32,
    pub finish_reason: FinishReason,
    /// False when rounds ran out (or calls kept failing) before the output
    /// looked finished.
    pub complete: bool,
    pub usage: Option<Usage>,
}

struct RoundOutcome {
    finish: FinishReason,
    usage: Option<Usage>,
}

pub struct ContinuationController<'a> {
    client: &'a dyn ModelClient,
    settings: &'a ContinuationSettings,
    cancel: &'a CancellationToken,
}

impl<'a> ContinuationController<'a> {
    pub fn new(
        client: &'a dyn ModelClient,
        settings: &'a ContinuationSettings,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            client,
            settings,
            cancel,
        }
    }

    /// Non-streaming generation.
    pub async fn generate(&self, base: &[ChatMessage]) -> Result<AssembledOutput, ModelError> {
        self.run(base, false, |_| {}).await
    }

    /// Streaming generation; `on_text` sees the whole assembled output after
    /// every delta.
    pub async fn generate_streaming<F>(
        &self,
        base: &[ChatMessage],
        on_text: F,
    ) -> Result<AssembledOutput, ModelError>
    where
        F: FnMut(&str),
    {
        self.run(base, true, on_text).await
    }

    async fn run<F>(
        &self,
        base: &[ChatMessage],
        streaming: bool,
        mut on_text: F,
    ) -> Result<AssembledOutput, ModelError>
    where
        F: FnMut(&str),
    {
        let max_rounds = self.settings.max_rounds.max(1);
        let mut assembled = String::new();
        let mut rounds = 0u32;
        let mut finish_reason = FinishReason::Unreported;
        let mut usage = None;
        let mut last_error = None;

        while rounds < max_rounds {
            if self.cancel.is_cancelled() {
                return Err(ModelError::Cancelled);
            }
            rounds += 1;

            let messages = if assembled.is_empty() {
                base.to_vec()
            } else {
                continuation_messages(base, &assembled)
            };
            let options = CompletionOptions {
                max_tokens: output_budget(self.settings, estimate_message_tokens(&messages)),
                temperature: self.settings.temperature,
                model: self.settings.model.clone(),
            };
            tracing::info!(
                round = rounds,
                max_rounds,
                max_tokens = options.max_tokens,
                assembled_chars = assembled.len(),
                "generation round"
            );

            let result = if streaming {
                self.stream_round(&messages, &options, &mut assembled, &mut on_text)
                    .await
            } else {
                self.complete_round(&messages, &options, &mut assembled).await
            };

            match result {
                Ok(outcome) => {
                    usage = merge_usage(usage, outcome.usage);
                    finish_reason = outcome.finish;
                    if !self.needs_continuation(&finish_reason, &assembled) {
                        return Ok(AssembledOutput {
                            text: assembled,
                            rounds,
                            finish_reason,
                            complete: true,
                            usage,
                        });
                    }
                    tracing::debug!(round = rounds, finish = ?finish_reason, "output looks truncated");
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::warn!(round = rounds, error = %err, "generation round failed");
                    last_error = Some(err);
                }
            }
        }

        if assembled.trim().is_empty() {
            return Err(last_error.unwrap_or(ModelError::EmptyResponse));
        }
        tracing::warn!(rounds, "continuation budget exhausted, returning partial output");
        Ok(AssembledOutput {
            text: assembled,
            rounds,
            finish_reason,
            complete: false,
            usage,
        })
    }

    fn needs_continuation(&self, finish: &FinishReason, assembled: &str) -> bool {
        finish.is_truncated()
            || self
                .settings
                .completeness
                .is_some_and(|kind| looks_incomplete(assembled, kind))
    }

    async fn complete_round(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
        assembled: &mut String,
    ) -> Result<RoundOutcome, ModelError> {
        let completion = self.client.complete(messages, options, self.cancel).await?;
        *assembled = append_with_overlap(assembled, &completion.text);
        Ok(RoundOutcome {
            finish: completion.finish_reason,
            usage: completion.usage,
        })
    }

    async fn stream_round<F>(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
        assembled: &mut String,
        on_text: &mut F,
    ) -> Result<RoundOutcome, ModelError>
    where
        F: FnMut(&str),
    {
        let mut stream = self.client.stream(messages, options, self.cancel).await?;
        let before = assembled.clone();
        let mut round_text = String::new();
        let mut outcome = RoundOutcome {
            finish: FinishReason::Unreported,
            usage: None,
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ModelError::Cancelled),
                next = stream.next() => next,
            };
            match next {
                None => break,
                Some(Ok(StreamEvent::Delta(text))) => {
                    round_text.push_str(&text);
                    *assembled = append_with_overlap(&before, &round_text);
                    on_text(assembled.as_str());
                }
                Some(Ok(StreamEvent::Usage(round_usage))) => outcome.usage = Some(round_usage),
                Some(Ok(StreamEvent::Finished(reason))) => outcome.finish = reason,
                // Text merged so far stays; the next round continues from it.
                Some(Err(err)) => return Err(err),
            }
        }

        if round_text.trim().is_empty() {
            return Err(ModelError::EmptyResponse);
        }
        Ok(outcome)
    }
}
