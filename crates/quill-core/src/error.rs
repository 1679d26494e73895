use thiserror::Error;

/// Failures writing to a host document.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("document {uri} rejected the edit after {attempts} attempts")]
    Rejected { uri: String, attempts: u32 },
    #[error("edit cancelled")]
    Cancelled,
}
