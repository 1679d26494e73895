use crate::diff::DiffSummary;
use crate::document::{BoxFuture, TextRange};
use crate::region::RegionMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque handle for a captured pre-edit snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointId(Uuid);

impl CheckpointId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CheckpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CheckpointId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointAction {
    /// Accept the edit; the snapshot is dropped.
    Keep,
    /// Restore the snapshot over the current content.
    Discard,
}

/// Lifecycle events for one edit, emitted to the display surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EditEvent {
    Started {
        checkpoint_id: CheckpointId,
        mode: RegionMode,
    },
    Progress {
        chars_written: usize,
    },
    Completed {
        checkpoint_id: CheckpointId,
        summary: DiffSummary,
    },
    Failed {
        message: String,
    },
}

/// A natural-language edit against one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditRequest {
    pub instruction: String,
    pub selection: Option<TextRange>,
    /// Editor language id (`"rust"`, `"html"`, ...), if known.
    pub language_id: Option<String>,
}

impl EditRequest {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            selection: None,
            language_id: None,
        }
    }

    pub fn with_selection(mut self, selection: TextRange) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn with_language(mut self, language_id: impl Into<String>) -> Self {
        self.language_id = Some(language_id.into());
        self
    }
}

/// Auxiliary file content gathered for a prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatheredContext {
    pub text: String,
    pub file_count: usize,
}

/// Read-only source of workspace content, bounded by a char budget.
pub trait ContextProvider: Send + Sync {
    fn gather<'a>(
        &'a self,
        query: &'a str,
        char_budget: usize,
    ) -> BoxFuture<'a, anyhow::Result<GatheredContext>>;
}
