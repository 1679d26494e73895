//! A document backed by a file on disk.
//!
//! Edits apply to an in-memory buffer; nothing touches the file until `save`.

use anyhow::{Context, Result};
use quill_core::{BoxFuture, DocumentHandle, MemoryDocument, Position, TextRange};
use std::fs;
use std::path::{Path, PathBuf};

/// Files larger than this are refused.
pub const MAX_DOCUMENT_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Debug)]
pub struct FileDocument {
    path: PathBuf,
    buffer: MemoryDocument,
    saved_version: std::sync::atomic::AtomicU64,
}

impl FileDocument {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let metadata =
            fs::metadata(&path).with_context(|| format!("Cannot read {}", path.display()))?;
        if metadata.len() > MAX_DOCUMENT_BYTES {
            anyhow::bail!(
                "{} is too large to edit ({} bytes, limit {})",
                path.display(),
                metadata.len(),
                MAX_DOCUMENT_BYTES
            );
        }
        let bytes = fs::read(&path).with_context(|| format!("Cannot read {}", path.display()))?;
        let text = String::from_utf8(bytes)
            .with_context(|| format!("{} is not valid UTF-8", path.display()))?;

        let buffer = MemoryDocument::new(path.display().to_string(), text);
        let saved_version = std::sync::atomic::AtomicU64::new(buffer.version());
        Ok(Self {
            path,
            buffer,
            saved_version,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Buffer differs from what was last read or saved.
    pub fn is_dirty(&self) -> bool {
        self.buffer.version() != self.saved_version.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Write the buffer back through a temp file in the same directory.
    pub fn save(&self) -> Result<()> {
        let version = self.buffer.version();
        let text = self.buffer.text();
        let tmp_path = self.path.with_extension("quill.tmp");
        fs::write(&tmp_path, text.as_bytes())
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        if let Ok(metadata) = fs::metadata(&self.path) {
            let _ = fs::set_permissions(&tmp_path, metadata.permissions());
        }
        if let Err(err) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err).with_context(|| format!("Failed to save {}", self.path.display()));
        }
        self.saved_version
            .store(version, std::sync::atomic::Ordering::SeqCst);
        tracing::info!(path = %self.path.display(), bytes = text.len(), "saved");
        Ok(())
    }
}

impl DocumentHandle for FileDocument {
    fn uri(&self) -> &str {
        self.buffer.uri()
    }

    fn text(&self) -> String {
        self.buffer.text()
    }

    fn text_in(&self, range: TextRange) -> Option<String> {
        self.buffer.text_in(range)
    }

    fn replace<'a>(&'a self, range: TextRange, text: &'a str) -> BoxFuture<'a, bool> {
        self.buffer.replace(range, text)
    }

    fn offset_at(&self, position: Position) -> usize {
        self.buffer.offset_at(position)
    }

    fn position_at(&self, offset: usize) -> Position {
        self.buffer.position_at(offset)
    }

    fn line_count(&self) -> usize {
        self.buffer.line_count()
    }

    fn version(&self) -> u64 {
        self.buffer.version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_edits_stay_in_memory_until_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.html");
        fs::write(&path, "<p>old</p>\n").unwrap();

        let doc = FileDocument::open(&path).unwrap();
        assert!(!doc.is_dirty());
        assert!(doc.replace(TextRange::new(3, 6), "new").await);
        assert!(doc.is_dirty());
        assert_eq!(fs::read_to_string(&path).unwrap(), "<p>old</p>\n");

        doc.save().unwrap();
        assert!(!doc.is_dirty());
        assert_eq!(fs::read_to_string(&path).unwrap(), "<p>new</p>\n");
        assert!(!path.with_extension("quill.tmp").exists());
    }

    #[test]
    fn test_positions_delegate_to_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.rs");
        fs::write(&path, "fn a() {}\nfn b() {}\n").unwrap();
        let doc = FileDocument::open(&path).unwrap();
        assert_eq!(doc.line_count(), 3);
        assert_eq!(doc.offset_at(Position::new(1, 3)), 13);
        assert_eq!(doc.position_at(13), Position::new(1, 3));
        assert!(doc.uri().ends_with("a.rs"));
    }

    #[test]
    fn test_rejects_non_utf8_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("blob.bin");
        fs::write(&binary, [0xff, 0xfe, 0x00]).unwrap();
        assert!(FileDocument::open(&binary).is_err());
        assert!(FileDocument::open(dir.path().join("missing.txt")).is_err());
    }
}
