pub mod client;
pub mod error;
pub mod models;
pub mod retry;
pub mod sse;

use futures::Stream;
use std::pin::Pin;

pub use client::{ClientSettings, HttpModelClient, ModelClient, DEFAULT_BASE_URL};
pub use error::ModelError;
pub use models::{
    ChatMessage, Completion, CompletionOptions, FinishReason, Role, StreamEvent, Usage,
};
pub use retry::RetryPolicy;

/// Events of one streaming call, in arrival order.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ModelError>> + Send>>;
