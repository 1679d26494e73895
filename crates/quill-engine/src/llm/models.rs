use serde::{Deserialize, Serialize};

/// Default model when nothing is configured.
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";
/// Default context window assumed for budgeting.
pub const DEFAULT_CONTEXT_WINDOW_TOKENS: u32 = 128_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Per-call generation options.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    /// Overrides the client's configured model for this call.
    pub model: Option<String>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            max_tokens: 4_096,
            temperature: 0.2,
            model: None,
        }
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    /// Output token limit reached; the text is probably cut off.
    Length,
    /// Stream ended without the provider reporting a reason.
    Unreported,
    Other(String),
}

impl FinishReason {
    pub fn from_api(reason: Option<&str>) -> Self {
        match reason {
            Some("stop") | Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
            Some("length") | Some("max_tokens") => FinishReason::Length,
            Some(other) => FinishReason::Other(other.to_string()),
            None => FinishReason::Unreported,
        }
    }

    pub fn is_truncated(&self) -> bool {
        matches!(self, FinishReason::Length)
    }
}

/// API usage information from the provider.
#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Sum two optional usages.
pub fn merge_usage(primary: Option<Usage>, secondary: Option<Usage>) -> Option<Usage> {
    match (primary, secondary) {
        (Some(p), Some(s)) => Some(Usage {
            prompt_tokens: p.prompt_tokens + s.prompt_tokens,
            completion_tokens: p.completion_tokens + s.completion_tokens,
            total_tokens: p.total_tokens + s.total_tokens,
        }),
        (Some(p), None) => Some(p),
        (None, Some(s)) => Some(s),
        (None, None) => None,
    }
}

/// A finished non-streaming call.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub finish_reason: FinishReason,
    pub usage: Option<Usage>,
}

/// One item of a streaming call.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Delta(String),
    Usage(Usage),
    Finished(FinishReason),
}
