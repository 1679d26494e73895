//! Scripted model client for engine tests.

use crate::llm::{
    ChatMessage, Completion, CompletionOptions, DeltaStream, FinishReason, ModelClient,
    ModelError, StreamEvent,
};
use crate::llm::sse::decode_events;
use futures::StreamExt;
use quill_core::BoxFuture;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// One scripted call result.
#[derive(Debug, Clone)]
pub enum Reply {
    Text {
        chunks: Vec<String>,
        finish: FinishReason,
    },
    /// Streams the chunks, then fails.
    Broken {
        chunks: Vec<String>,
        error: ModelError,
    },
    Fail(ModelError),
    /// Raw SSE body parts run through the real decoder.
    Sse(Vec<String>),
}

impl Reply {
    pub fn text(chunks: &[&str], finish: FinishReason) -> Self {
        Reply::Text {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            finish,
        }
    }
}

#[derive(Default)]
pub struct ScriptedClient {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<(Vec<ChatMessage>, CompletionOptions)>>,
}

impl ScriptedClient {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn requests(&self) -> Vec<(Vec<ChatMessage>, CompletionOptions)> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn next_reply(&self, messages: &[ChatMessage], options: &CompletionOptions) -> Reply {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push((messages.to_vec(), options.clone()));
        }
        self.replies
            .lock()
            .ok()
            .and_then(|mut r| r.pop_front())
            .unwrap_or(Reply::Fail(ModelError::Api {
                status: 500,
                message: "script exhausted".to_string(),
            }))
    }
}

impl ModelClient for ScriptedClient {
    fn model_id(&self) -> &str {
        "scripted/model"
    }

    fn complete<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        options: &'a CompletionOptions,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Completion, ModelError>> {
        let reply = self.next_reply(messages, options);
        Box::pin(async move {
            match reply {
                Reply::Text { chunks, finish } => {
                    let text = chunks.concat();
                    if text.trim().is_empty() {
                        return Err(ModelError::EmptyResponse);
                    }
                    Ok(Completion {
                        text,
                        finish_reason: finish,
                        usage: None,
                    })
                }
                Reply::Broken { error, .. } | Reply::Fail(error) => Err(error),
                Reply::Sse(_) => Err(ModelError::Decode("SSE reply on a non-streaming call".into())),
            }
        })
    }

    fn stream<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        options: &'a CompletionOptions,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<DeltaStream, ModelError>> {
        let reply = self.next_reply(messages, options);
        Box::pin(async move {
            let items: Vec<Result<StreamEvent, ModelError>> = match reply {
                Reply::Text { chunks, finish } => chunks
                    .into_iter()
                    .map(|c| Ok(StreamEvent::Delta(c)))
                    .chain(std::iter::once(Ok(StreamEvent::Finished(finish))))
                    .collect(),
                Reply::Broken { chunks, error } => chunks
                    .into_iter()
                    .map(|c| Ok(StreamEvent::Delta(c)))
                    .chain(std::iter::once(Err(error)))
                    .collect(),
                Reply::Fail(error) => return Err(error),
                Reply::Sse(parts) => {
                    let body = futures::stream::iter(
                        parts
                            .into_iter()
                            .map(|p| Ok::<_, reqwest::Error>(p.into_bytes())),
                    );
                    return Ok(decode_events(body));
                }
            };
            // Yield between events so spawned writers get to run mid-stream.
            let stream: DeltaStream = Box::pin(futures::stream::iter(items).then(|item| async {
                tokio::task::yield_now().await;
                item
            }));
            Ok(stream)
        })
    }
}
