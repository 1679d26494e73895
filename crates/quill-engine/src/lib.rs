//! Model calls, continuation, streaming writes and checkpoints for Quill.

pub mod checkpoint;
pub mod continuation;
pub mod llm;
pub mod parse;
pub mod prompts;
pub mod session;
pub mod sync;

#[cfg(test)]
mod testing;

use quill_core::EditEvent;

/// Where lifecycle events for an edit are delivered.
pub type EventSink = tokio::sync::mpsc::UnboundedSender<EditEvent>;

pub use checkpoint::{CheckpointError, CheckpointManager};
pub use continuation::{AssembledOutput, ContinuationController, ContinuationSettings};
pub use llm::{ClientSettings, HttpModelClient, ModelClient, ModelError};
pub use session::{EditError, EditOutcome, EditSession, EngineSettings, Turn};
pub use sync::{StreamSession, SyncSettings, WritePolicy};
