//! One editing conversation: history, pending checkpoints and the active
//! model override, plus the end-to-end edit pipeline.

use crate::checkpoint::{CheckpointError, CheckpointManager};
use crate::continuation::{AssembledOutput, ContinuationController, ContinuationSettings};
use crate::llm::{ModelClient, ModelError, Usage};
use crate::parse::{finalize_output, strip_code_fences};
use crate::prompts::{build_edit_messages, PromptInput};
use crate::sync::{StreamSession, SyncSettings};
use crate::EventSink;
use quill_core::util::truncate_str;
use quill_core::{
    looks_incomplete, select_region, CheckpointAction, CheckpointId, ContentKind, ContextProvider,
    DiffSummary, DocumentError, DocumentHandle, EditEvent, EditRequest, GatheredContext,
    RegionMode, TargetRegion, TextRange,
};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Prior turns kept for prompts; oldest dropped first.
pub const HISTORY_LIMIT: usize = 10;
pub const DEFAULT_CONTEXT_CHAR_BUDGET: usize = 24_000;
const MAX_ERROR_MESSAGE_LEN: usize = 300;

/// A completed instruction and a short description of what it did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub instruction: String,
    pub outcome: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub continuation: ContinuationSettings,
    pub sync: SyncSettings,
    /// Char budget handed to the context provider; 0 disables gathering.
    pub context_char_budget: usize,
    /// Stream deltas into the document; otherwise write once at the end.
    pub streaming: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            continuation: ContinuationSettings::default(),
            sync: SyncSettings::default(),
            context_char_budget: DEFAULT_CONTEXT_CHAR_BUDGET,
            streaming: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum EditError {
    #[error(transparent)]
    Model(ModelError),
    #[error(transparent)]
    Document(DocumentError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error("the model returned no usable content")]
    EmptyOutput,
    #[error("edit cancelled")]
    Cancelled,
}

impl From<ModelError> for EditError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Cancelled => EditError::Cancelled,
            ModelError::EmptyResponse => EditError::EmptyOutput,
            other => EditError::Model(other),
        }
    }
}

impl From<DocumentError> for EditError {
    fn from(err: DocumentError) -> Self {
        match err {
            DocumentError::Cancelled => EditError::Cancelled,
            other => EditError::Document(other),
        }
    }
}

impl EditError {
    /// Single line suitable for an `editFailed` notification.
    pub fn user_message(&self) -> String {
        let message = match self {
            EditError::Model(ModelError::Auth(_)) | EditError::Model(ModelError::MissingApiKey) => {
                format!("{self}. Check the API key (QUILL_API_KEY or `quill config set api_key`).")
            }
            EditError::Model(ModelError::RateLimited { .. }) => {
                "Rate limited by the model provider. Wait a moment and try again.".to_string()
            }
            EditError::Document(DocumentError::Rejected { .. }) => {
                format!("{self}. The document was restored.")
            }
            _ => self.to_string(),
        };
        truncate_str(&message, MAX_ERROR_MESSAGE_LEN).to_string()
    }
}

/// What a successful edit did.
#[derive(Debug, Clone, PartialEq)]
pub struct EditOutcome {
    pub checkpoint_id: CheckpointId,
    pub mode: RegionMode,
    /// Where the new text now lives.
    pub range: TextRange,
    pub summary: DiffSummary,
    pub rounds: u32,
    /// False when generation ran out of rounds before looking finished.
    pub complete: bool,
    pub usage: Option<Usage>,
}

struct Generated {
    output: AssembledOutput,
    final_text: String,
    range: TextRange,
}

/// Owns everything that used to be ambient editor state. Created per chat;
/// `reset` starts a new chat.
pub struct EditSession {
    client: Arc<dyn ModelClient>,
    settings: EngineSettings,
    context: Option<Arc<dyn ContextProvider>>,
    model_override: Option<String>,
    history: VecDeque<Turn>,
    checkpoints: CheckpointManager,
}

impl EditSession {
    pub fn new(client: Arc<dyn ModelClient>, settings: EngineSettings) -> Self {
        let checkpoints = CheckpointManager::new(settings.sync.write);
        Self {
            client,
            settings,
            context: None,
            model_override: None,
            history: VecDeque::new(),
            checkpoints,
        }
    }

    pub fn with_context_provider(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.context = Some(provider);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Use `model` for this session's calls instead of the configured one.
    pub fn set_model_override(&mut self, model: Option<String>) {
        self.model_override = model.filter(|m| !m.trim().is_empty());
    }

    pub fn model_override(&self) -> Option<&str> {
        self.model_override.as_deref()
    }

    pub fn history(&self) -> impl Iterator<Item = &Turn> {
        self.history.iter()
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// New chat: forget history and every pending checkpoint.
    pub fn reset(&mut self) {
        self.history.clear();
        self.checkpoints.clear();
        tracing::debug!("session reset");
    }

    pub async fn keep_checkpoint(&mut self, id: CheckpointId) -> Result<(), CheckpointError> {
        self.checkpoints.resolve(id, CheckpointAction::Keep).await
    }

    pub async fn discard_checkpoint(&mut self, id: CheckpointId) -> Result<(), CheckpointError> {
        self.checkpoints.resolve(id, CheckpointAction::Discard).await
    }

    /// Run one edit against `document`, streaming into it when enabled.
    ///
    /// On success the checkpoint stays pending until kept or discarded. On
    /// failure the document is rolled back before `Failed` is emitted.
    pub async fn run_edit(
        &mut self,
        document: Arc<dyn DocumentHandle>,
        request: &EditRequest,
        events: &EventSink,
        cancel: CancellationToken,
    ) -> Result<EditOutcome, EditError> {
        let text = document.text();
        let region = select_region(&text, request.selection, &request.instruction);
        let original = region.original_text(&text).to_string();
        let kind = match request.language_id.as_deref() {
            Some(id) => ContentKind::from_language_id(id),
            None => ContentKind::from_path(Path::new(document.uri())),
        };
        // A region that is already unbalanced would keep the heuristic
        // asking for more forever.
        let completeness = (!looks_incomplete(&original, kind)).then_some(kind);
        tracing::info!(
            uri = document.uri(),
            mode = region.mode.label(),
            start_line = region.lines.start,
            end_line = region.lines.end,
            ?completeness,
            "edit started"
        );

        let context = self.gather_context(&request.instruction).await;
        let history: Vec<Turn> = self.history.iter().cloned().collect();
        let messages = build_edit_messages(&PromptInput {
            instruction: &request.instruction,
            file_label: document.uri(),
            document_text: &text,
            region: &region,
            context: context.as_ref(),
            history: &history,
        });

        let checkpoint_id = self.checkpoints.capture(Arc::clone(&document));
        let _ = events.send(EditEvent::Started {
            checkpoint_id,
            mode: region.mode,
        });

        let result = self
            .generate(&document, &region, &original, &messages, completeness, events, &cancel)
            .await;

        match result {
            Ok(generated) => {
                let summary = DiffSummary::between(&original, &generated.final_text);
                tracing::info!(
                    uri = document.uri(),
                    rounds = generated.output.rounds,
                    complete = generated.output.complete,
                    changes = %summary.label(),
                    "edit completed"
                );
                let _ = events.send(EditEvent::Completed {
                    checkpoint_id,
                    summary,
                });
                self.push_history(Turn {
                    instruction: request.instruction.clone(),
                    outcome: format!(
                        "Edited the {} of {} (lines {}-{}): {}.",
                        region.mode.label(),
                        document.uri(),
                        region.lines.start + 1,
                        region.lines.end,
                        summary.label()
                    ),
                });
                Ok(EditOutcome {
                    checkpoint_id,
                    mode: region.mode,
                    range: generated.range,
                    summary,
                    rounds: generated.output.rounds,
                    complete: generated.output.complete,
                    usage: generated.output.usage,
                })
            }
            Err(err) => {
                tracing::warn!(uri = document.uri(), error = %err, "edit failed, rolling back");
                if let Err(restore) = self
                    .checkpoints
                    .resolve(checkpoint_id, CheckpointAction::Discard)
                    .await
                {
                    tracing::error!(%checkpoint_id, error = %restore, "rollback failed");
                }
                let _ = events.send(EditEvent::Failed {
                    message: err.user_message(),
                });
                Err(err)
            }
        }
    }

    async fn gather_context(&self, instruction: &str) -> Option<GatheredContext> {
        let provider = self.context.as_ref()?;
        let budget = self.settings.context_char_budget;
        if budget == 0 {
            return None;
        }
        match provider.gather(instruction, budget).await {
            Ok(context) if context.file_count > 0 => Some(context),
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(error = %err, "context gathering failed, continuing without it");
                None
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn generate(
        &self,
        document: &Arc<dyn DocumentHandle>,
        region: &TargetRegion,
        original: &str,
        messages: &[crate::llm::ChatMessage],
        completeness: Option<ContentKind>,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<Generated, EditError> {
        let continuation = ContinuationSettings {
            model: self
                .model_override
                .clone()
                .or_else(|| self.settings.continuation.model.clone()),
            completeness,
            ..self.settings.continuation.clone()
        };
        let controller = ContinuationController::new(&*self.client, &continuation, cancel);
        let mut stream = StreamSession::attach(
            Arc::clone(document),
            region.range,
            self.settings.sync,
            Some(events.clone()),
            cancel.clone(),
        );

        let output = if self.settings.streaming {
            controller
                .generate_streaming(messages, |text| stream.on_delta(strip_code_fences(text)))
                .await
        } else {
            controller.generate(messages).await
        };
        let output = match output {
            Ok(output) => output,
            Err(err) => {
                // No write may land after the rollback.
                stream.close().await;
                return Err(err.into());
            }
        };

        let final_text = finalize_output(&output.text, original);
        if final_text.trim().is_empty() {
            stream.close().await;
            return Err(EditError::EmptyOutput);
        }
        if !output.complete {
            tracing::warn!(
                rounds = output.rounds,
                "output may be incomplete, writing what was generated"
            );
        }

        let range = stream.finish(&final_text).await?;
        Ok(Generated {
            output,
            final_text,
            range,
        })
    }

    fn push_history(&mut self, turn: Turn) {
        self.history.push_back(turn);
        while self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }
    }
}
