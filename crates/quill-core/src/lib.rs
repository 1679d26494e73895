//! Core domain model and contracts for Quill.
//!
//! Everything here is synchronous and runtime-free: overlap merging, the
//! truncation heuristic, region selection and the document contract the
//! engine writes through.

pub mod append;
pub mod completeness;
pub mod diff;
pub mod document;
pub mod error;
pub mod protocol;
pub mod region;
pub mod util;

pub use append::append_with_overlap;
pub use completeness::{looks_incomplete, ContentKind};
pub use diff::DiffSummary;
pub use document::{BoxFuture, DocumentHandle, LineIndex, MemoryDocument, Position, TextRange};
pub use error::DocumentError;
pub use protocol::*;
pub use region::{select_region, RegionMode, TargetRegion};
