//! Document contract shared by the engine and host adapters.
//!
//! Offsets are UTF-8 byte offsets into the document text. `Position::character`
//! counts chars within a line, which is what editor gutters display.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Position {
    pub line: usize,
    pub character: usize,
}

impl Position {
    pub fn new(line: usize, character: usize) -> Self {
        Self { line, character }
    }
}

/// Half-open byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextRange {
    pub start: usize,
    pub end: usize,
}

impl TextRange {
    pub fn new(start: usize, end: usize) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.start && offset < self.end
    }
}

/// A mutable, addressable text container owned by the host editor.
///
/// `replace` resolves to `false` when the host rejects the edit (for example
/// because the buffer changed underneath it). Callers treat that as transient.
pub trait DocumentHandle: Send + Sync {
    /// Stable identifier used in logs and checkpoints.
    fn uri(&self) -> &str;

    fn text(&self) -> String;

    fn text_in(&self, range: TextRange) -> Option<String>;

    fn replace<'a>(&'a self, range: TextRange, text: &'a str) -> BoxFuture<'a, bool>;

    fn offset_at(&self, position: Position) -> usize;

    fn position_at(&self, offset: usize) -> Position;

    fn line_count(&self) -> usize;

    /// Monotonic counter bumped by every accepted `replace`.
    fn version(&self) -> u64;

    fn len(&self) -> usize {
        self.text().len()
    }

    fn full_range(&self) -> TextRange {
        TextRange::new(0, self.len())
    }
}

/// Byte offsets of every line start in a text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineIndex {
    starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(
            text.bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self {
            starts,
            len: text.len(),
        }
    }

    /// Number of lines; a trailing newline opens one more (empty) line.
    pub fn line_count(&self) -> usize {
        self.starts.len()
    }

    pub fn line_start(&self, line: usize) -> usize {
        self.starts.get(line).copied().unwrap_or(self.len)
    }

    /// Offset just past the line's content, excluding its newline.
    pub fn line_end(&self, line: usize) -> usize {
        match self.starts.get(line + 1) {
            Some(next) => next - 1,
            None => self.len,
        }
    }

    pub fn line_of(&self, offset: usize) -> usize {
        let offset = offset.min(self.len);
        match self.starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next.saturating_sub(1),
        }
    }

    pub fn offset_at(&self, text: &str, position: Position) -> usize {
        if position.line >= self.starts.len() {
            return self.len;
        }
        let start = self.line_start(position.line);
        let end = self.line_end(position.line);
        text[start..end]
            .char_indices()
            .nth(position.character)
            .map(|(i, _)| start + i)
            .unwrap_or(end)
    }

    pub fn position_at(&self, text: &str, offset: usize) -> Position {
        let offset = floor_char_boundary(text, offset.min(self.len));
        let line = self.line_of(offset);
        let start = self.line_start(line);
        Position::new(line, text[start..offset].chars().count())
    }
}

/// Largest char boundary `<= offset`.
pub fn floor_char_boundary(text: &str, offset: usize) -> usize {
    let mut offset = offset.min(text.len());
    while offset > 0 && !text.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}

pub fn ceil_char_boundary(text: &str, offset: usize) -> usize {
    let mut offset = offset.min(text.len());
    while offset < text.len() && !text.is_char_boundary(offset) {
        offset += 1;
    }
    offset
}

#[derive(Debug)]
struct MemoryState {
    text: String,
    version: u64,
}

/// In-process document used by file-backed adapters and tests.
#[derive(Debug)]
pub struct MemoryDocument {
    uri: String,
    state: Mutex<MemoryState>,
    reject_next: AtomicUsize,
    replace_calls: AtomicUsize,
}

impl MemoryDocument {
    pub fn new(uri: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            state: Mutex::new(MemoryState {
                text: text.into(),
                version: 0,
            }),
            reject_next: AtomicUsize::new(0),
            replace_calls: AtomicUsize::new(0),
        }
    }

    /// Make the next `count` calls to `replace` report a busy host.
    pub fn reject_next(&self, count: usize) {
        self.reject_next.store(count, Ordering::SeqCst);
    }

    /// Total `replace` calls seen, accepted or not.
    pub fn replace_calls(&self) -> usize {
        self.replace_calls.load(Ordering::SeqCst)
    }

    /// Replace the whole text outside the `DocumentHandle` contract, as a
    /// human typing in the editor would.
    pub fn set_text(&self, text: impl Into<String>) {
        let mut state = self.lock();
        state.text = text.into();
        state.version += 1;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn apply_replace(&self, range: TextRange, text: &str) -> bool {
        self.replace_calls.fetch_add(1, Ordering::SeqCst);
        let rejected = self
            .reject_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return false;
        }

        let mut state = self.lock();
        if range.end > state.text.len()
            || !state.text.is_char_boundary(range.start)
            || !state.text.is_char_boundary(range.end)
        {
            return false;
        }
        state.text.replace_range(range.start..range.end, text);
        state.version += 1;
        true
    }
}

impl DocumentHandle for MemoryDocument {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn text(&self) -> String {
        self.lock().text.clone()
    }

    fn text_in(&self, range: TextRange) -> Option<String> {
        self.lock().text.get(range.start..range.end).map(str::to_string)
    }

    fn replace<'a>(&'a self, range: TextRange, text: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(std::future::ready(self.apply_replace(range, text)))
    }

    fn offset_at(&self, position: Position) -> usize {
        let state = self.lock();
        LineIndex::new(&state.text).offset_at(&state.text, position)
    }

    fn position_at(&self, offset: usize) -> Position {
        let state = self.lock();
        LineIndex::new(&state.text).position_at(&state.text, offset)
    }

    fn line_count(&self) -> usize {
        LineIndex::new(&self.lock().text).line_count()
    }

    fn version(&self) -> u64 {
        self.lock().version
    }

    fn len(&self) -> usize {
        self.lock().text.len()
    }
}
