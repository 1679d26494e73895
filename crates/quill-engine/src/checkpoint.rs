//! Whole-document snapshots taken before an edit, for atomic undo.

use crate::sync::{replace_with_retry, WritePolicy};
use chrono::{DateTime, Utc};
use quill_core::{CheckpointAction, CheckpointId, DocumentError, DocumentHandle};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    #[error("no pending checkpoint {0}")]
    NotFound(CheckpointId),
    #[error("could not restore checkpoint: {0}")]
    Restore(#[from] DocumentError),
}

pub struct Checkpoint {
    pub id: CheckpointId,
    pub document: Arc<dyn DocumentHandle>,
    pub snapshot: String,
    pub created_at: DateTime<Utc>,
}

/// Pending checkpoints of one session. Entries live until resolved or
/// cleared; there is no expiry.
#[derive(Default)]
pub struct CheckpointManager {
    checkpoints: HashMap<CheckpointId, Checkpoint>,
    write: WritePolicy,
}

impl CheckpointManager {
    pub fn new(write: WritePolicy) -> Self {
        Self {
            checkpoints: HashMap::new(),
            write,
        }
    }

    /// Snapshot the document's full text. Call before the first mutation.
    pub fn capture(&mut self, document: Arc<dyn DocumentHandle>) -> CheckpointId {
        let id = CheckpointId::new();
        let snapshot = document.text();
        tracing::debug!(%id, uri = document.uri(), bytes = snapshot.len(), "checkpoint captured");
        self.checkpoints.insert(
            id,
            Checkpoint {
                id,
                document,
                snapshot,
                created_at: Utc::now(),
            },
        );
        id
    }

    /// Keep drops the snapshot; Discard writes it back over the whole
    /// document. The entry is consumed either way, unless the restore
    /// itself fails, in which case it stays so the caller can retry.
    pub async fn resolve(
        &mut self,
        id: CheckpointId,
        action: CheckpointAction,
    ) -> Result<(), CheckpointError> {
        let checkpoint = self
            .checkpoints
            .remove(&id)
            .ok_or(CheckpointError::NotFound(id))?;

        match action {
            CheckpointAction::Keep => {
                tracing::debug!(%id, "checkpoint kept");
                Ok(())
            }
            CheckpointAction::Discard => {
                if let Err(err) = restore(&checkpoint, self.write).await {
                    tracing::warn!(%id, error = %err, "checkpoint restore failed");
                    self.checkpoints.insert(id, checkpoint);
                    return Err(err.into());
                }
                tracing::info!(%id, uri = checkpoint.document.uri(), "checkpoint restored");
                Ok(())
            }
        }
    }

    pub fn get(&self, id: CheckpointId) -> Option<&Checkpoint> {
        self.checkpoints.get(&id)
    }

    pub fn contains(&self, id: CheckpointId) -> bool {
        self.checkpoints.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    /// Pending ids, oldest first.
    pub fn pending(&self) -> Vec<CheckpointId> {
        let mut pending: Vec<&Checkpoint> = self.checkpoints.values().collect();
        pending.sort_by_key(|c| c.created_at);
        pending.into_iter().map(|c| c.id).collect()
    }

    /// Forget every pending checkpoint without touching documents.
    pub fn clear(&mut self) {
        if !self.checkpoints.is_empty() {
            tracing::debug!(count = self.checkpoints.len(), "checkpoints cleared");
        }
        self.checkpoints.clear();
    }
}

async fn restore(checkpoint: &Checkpoint, write: WritePolicy) -> Result<(), DocumentError> {
    let document = &*checkpoint.document;
    if document.text() == checkpoint.snapshot {
        return Ok(());
    }
    // Restores must land even when the edit that triggered them was cancelled.
    replace_with_retry(
        document,
        document.full_range(),
        &checkpoint.snapshot,
        write,
        &CancellationToken::new(),
    )
    .await
}
