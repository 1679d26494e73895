//! Server-sent-event decoding for streaming chat completions.

use super::error::{map_reqwest_error, ModelError};
use super::models::{FinishReason, StreamEvent, Usage};
use super::DeltaStream;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::collections::VecDeque;

/// Splits a byte stream into complete `data:` payloads.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event_data: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns the payloads of every event they completed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.event_data.is_empty() {
                    payloads.push(std::mem::take(&mut self.event_data));
                }
                continue;
            }

            if let Some(data) = line.strip_prefix("data:") {
                if !self.event_data.is_empty() {
                    self.event_data.push('\n');
                }
                self.event_data.push_str(data.trim_start());
            }
        }
        payloads
    }

    /// Flush a trailing event the server did not terminate with a blank line.
    pub fn finish(&mut self) -> Option<String> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).trim_end().to_string();
            if let Some(data) = line.strip_prefix("data:") {
                if !self.event_data.is_empty() {
                    self.event_data.push('\n');
                }
                self.event_data.push_str(data.trim_start());
            }
        }
        let data = std::mem::take(&mut self.event_data);
        (!data.trim().is_empty()).then_some(data)
    }
}

#[derive(Deserialize, Default)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Deserialize, Default)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[derive(Deserialize)]
struct StreamError {
    message: String,
    #[serde(default)]
    code: Option<u16>,
}

/// Decoded form of one payload.
#[derive(Debug, PartialEq)]
pub(crate) enum Payload {
    Events(Vec<StreamEvent>),
    Done,
}

pub(crate) fn parse_payload(payload: &str) -> Result<Payload, ModelError> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(Payload::Events(Vec::new()));
    }
    if payload == "[DONE]" {
        return Ok(Payload::Done);
    }

    let chunk: StreamChunk = serde_json::from_str(payload)
        .map_err(|err| ModelError::Decode(format!("bad stream chunk: {err}")))?;
    if let Some(error) = chunk.error {
        return Err(ModelError::Api {
            status: error.code.unwrap_or(500),
            message: error.message,
        });
    }

    let mut events = Vec::new();
    for choice in chunk.choices {
        if let Some(refusal) = choice.delta.refusal.filter(|r| !r.trim().is_empty()) {
            return Err(ModelError::Refused(refusal));
        }
        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            events.push(StreamEvent::Delta(text));
        }
        if let Some(reason) = choice.finish_reason {
            events.push(StreamEvent::Finished(FinishReason::from_api(Some(&reason))));
        }
    }
    if let Some(usage) = chunk.usage {
        events.push(StreamEvent::Usage(usage));
    }
    Ok(Payload::Events(events))
}

struct DecodeState<S> {
    body: S,
    decoder: SseDecoder,
    pending: VecDeque<Result<StreamEvent, ModelError>>,
    saw_finish: bool,
    ended: bool,
}

impl<S> DecodeState<S> {
    fn absorb(&mut self, payload: &str) {
        match parse_payload(payload) {
            Ok(Payload::Events(events)) => {
                for event in events {
                    if matches!(event, StreamEvent::Finished(_)) {
                        self.saw_finish = true;
                    }
                    self.pending.push_back(Ok(event));
                }
            }
            Ok(Payload::Done) => self.close(),
            Err(err) => {
                self.pending.push_back(Err(err));
                self.ended = true;
            }
        }
    }

    /// Body closed without `[DONE]`. Only a reported finish reason makes
    /// that a normal end; otherwise the connection dropped mid-answer.
    fn end_of_body(&mut self) {
        if !self.saw_finish {
            self.pending.push_back(Err(ModelError::Network(
                "stream ended early".to_string(),
            )));
        }
        self.ended = true;
    }

    fn close(&mut self) {
        if !self.saw_finish {
            self.saw_finish = true;
            self.pending
                .push_back(Ok(StreamEvent::Finished(FinishReason::Unreported)));
        }
        self.ended = true;
    }
}

/// Turn an SSE byte stream into model stream events. Ends with a
/// `Finished` event, or with an error when the transport fails or the body
/// stops before the server signalled the end.
pub fn decode_events<S, B>(body: S) -> DeltaStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = DecodeState {
        body,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        saw_finish: false,
        ended: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.ended {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => {
                    for payload in state.decoder.push(bytes.as_ref()) {
                        state.absorb(&payload);
                        if state.ended {
                            break;
                        }
                    }
                }
                Some(Err(err)) => {
                    state.ended = true;
                    return Some((Err(map_reqwest_error(err)), state));
                }
                None => {
                    if let Some(payload) = state.decoder.finish() {
                        state.absorb(&payload);
                    }
                    if !state.ended {
                        state.end_of_body();
                    }
                }
            }
        }
    }))
}
