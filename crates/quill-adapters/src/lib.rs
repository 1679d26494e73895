//! Runtime adapters for Quill (config, files on disk, workspace context, logging).

pub mod config;
pub mod file_document;
pub mod logging;
pub mod workspace;

pub use config::Config;
pub use file_document::FileDocument;
pub use workspace::WorkspaceContext;
