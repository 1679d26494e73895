//! Streaming document synchronizer.
//!
//! One `StreamSession` owns the target range of one edit. Deltas go into a
//! single-slot mailbox (newer text overwrites unconsumed text), and a worker
//! task drains it, so at most one document mutation is in flight and the
//! document always converges on the freshest output. `finish` performs the
//! final authoritative write.

pub mod write;

use crate::EventSink;
use quill_core::document::floor_char_boundary;
use quill_core::{DocumentError, DocumentHandle, EditEvent, TextRange};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
pub use write::{replace_with_retry, WritePolicy};

/// Minimum growth (in chars) before another partial write is attempted.
pub const DEFAULT_WRITE_THRESHOLD_CHARS: usize = 160;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub write_threshold_chars: usize,
    pub write: WritePolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            write_threshold_chars: DEFAULT_WRITE_THRESHOLD_CHARS,
            write: WritePolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
struct Pending {
    seq: u64,
    text: String,
}

/// Where the session believes its text lives.
#[derive(Debug)]
struct Tracked {
    start: usize,
    end: usize,
    original_len: usize,
    /// Text the session expects at `start..end`.
    expected: String,
    applied_chars: usize,
    /// Document version right after the session's last accepted write.
    own_version: u64,
    /// Document length at `own_version`.
    doc_len: usize,
    /// Someone else edited the document; partial writes stop.
    diverged: bool,
    writes: usize,
    failed_writes: usize,
}

struct Shared {
    document: Arc<dyn DocumentHandle>,
    settings: SyncSettings,
    tracked: Mutex<Tracked>,
    busy: AtomicBool,
    events: Option<EventSink>,
}

impl Shared {
    fn tracked(&self) -> MutexGuard<'_, Tracked> {
        match self.tracked.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn write(&self, text: &str, cancel: &CancellationToken) {
        let range = {
            let mut tracked = self.tracked();
            if tracked.diverged {
                return;
            }
            if self.document.version() != tracked.own_version {
                tracked.diverged = true;
                tracing::warn!(
                    uri = self.document.uri(),
                    "document changed during streaming, pausing partial writes"
                );
                return;
            }
            TextRange::new(tracked.start, tracked.end)
        };

        match replace_with_retry(&*self.document, range, text, self.settings.write, cancel).await {
            Ok(()) => {
                let version = self.document.version();
                let chars = text.chars().count();
                {
                    let mut tracked = self.tracked();
                    tracked.doc_len = tracked.doc_len.saturating_sub(range.len()) + text.len();
                    tracked.end = tracked.start + text.len();
                    tracked.expected = text.to_string();
                    tracked.applied_chars = chars;
                    tracked.own_version = version;
                    tracked.writes += 1;
                }
                tracing::debug!(
                    uri = self.document.uri(),
                    start = range.start,
                    replaced_end = range.end,
                    chars,
                    "streamed partial output"
                );
                if let Some(events) = &self.events {
                    let _ = events.send(EditEvent::Progress {
                        chars_written: chars,
                    });
                }
            }
            Err(err) => {
                self.tracked().failed_writes += 1;
                tracing::warn!(uri = self.document.uri(), error = %err, "partial write failed");
            }
        }
    }
}

/// Counters for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    pub writes: usize,
    pub failed_writes: usize,
    pub diverged: bool,
}

/// An in-flight streaming write into one document range.
pub struct StreamSession {
    shared: Arc<Shared>,
    mailbox: watch::Sender<Option<Pending>>,
    applied: watch::Receiver<u64>,
    worker: Option<JoinHandle<()>>,
    stop: CancellationToken,
    cancel: CancellationToken,
    posted_seq: u64,
    latest: String,
    /// `latest` has not been handed to the worker.
    dirty: bool,
}

impl StreamSession {
    /// Start tracking `range`. Must be called inside a tokio runtime.
    pub fn attach(
        document: Arc<dyn DocumentHandle>,
        range: TextRange,
        settings: SyncSettings,
        events: Option<EventSink>,
        cancel: CancellationToken,
    ) -> Self {
        let tracked = Tracked {
            start: range.start,
            end: range.end,
            original_len: range.len(),
            expected: document.text_in(range).unwrap_or_default(),
            applied_chars: 0,
            own_version: document.version(),
            doc_len: document.text().len(),
            diverged: false,
            writes: 0,
            failed_writes: 0,
        };
        let shared = Arc::new(Shared {
            document,
            settings,
            tracked: Mutex::new(tracked),
            busy: AtomicBool::new(false),
            events,
        });

        let (mailbox, mailbox_rx) = watch::channel(None);
        let (applied_tx, applied) = watch::channel(0u64);
        let stop = cancel.child_token();
        let worker = tokio::spawn(run_worker(
            Arc::clone(&shared),
            mailbox_rx,
            applied_tx,
            stop.clone(),
            cancel.clone(),
        ));

        Self {
            shared,
            mailbox,
            applied,
            worker: Some(worker),
            stop,
            cancel,
            posted_seq: 0,
            latest: String::new(),
            dirty: false,
        }
    }

    /// Offer the full accumulated text. Only posts a write once the text has
    /// grown by the threshold since the last applied write (or shrank).
    pub fn on_delta(&mut self, accumulated: &str) {
        if accumulated == self.latest {
            return;
        }
        self.latest.clear();
        self.latest.push_str(accumulated);
        self.dirty = true;

        let applied = self.shared.tracked().applied_chars;
        let chars = accumulated.chars().count();
        if chars >= applied + self.shared.settings.write_threshold_chars || chars < applied {
            self.post();
        }
    }

    fn post(&mut self) {
        self.posted_seq += 1;
        self.dirty = false;
        self.mailbox.send_replace(Some(Pending {
            seq: self.posted_seq,
            text: self.latest.clone(),
        }));
    }

    /// Write whatever was held back by throttling and wait until no write is
    /// in flight.
    pub async fn flush(&mut self) -> Result<(), DocumentError> {
        if self.dirty {
            self.post();
        }
        self.drain().await
    }

    /// Wait for every posted write to be attempted.
    async fn drain(&mut self) -> Result<(), DocumentError> {
        let target = self.posted_seq;
        loop {
            let applied = *self.applied.borrow_and_update();
            if applied >= target {
                return Ok(());
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(DocumentError::Cancelled),
                changed = self.applied.changed() => {
                    if changed.is_err() {
                        return Err(DocumentError::Cancelled);
                    }
                }
            }
        }
    }

    /// Stop the worker once it is idle.
    pub async fn close(&mut self) {
        self.stop.cancel();
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }

    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> SyncStats {
        let tracked = self.shared.tracked();
        SyncStats {
            writes: tracked.writes,
            failed_writes: tracked.failed_writes,
            diverged: tracked.diverged,
        }
    }

    /// Current tracked range.
    pub fn range(&self) -> TextRange {
        let tracked = self.shared.tracked();
        TextRange::new(tracked.start, tracked.end)
    }

    /// Final authoritative write of `final_text` over the whole region, after
    /// in-flight partial writes settle. Returns the region's new range.
    pub async fn finish(mut self, final_text: &str) -> Result<TextRange, DocumentError> {
        self.drain().await?;
        self.close().await;

        let (range, already_applied) = self.reconcile(final_text);
        let written = TextRange::new(range.start, range.start + final_text.len());
        if already_applied {
            return Ok(written);
        }

        replace_with_retry(
            &*self.shared.document,
            range,
            final_text,
            self.shared.settings.write,
            &self.cancel,
        )
        .await?;
        tracing::debug!(
            uri = self.shared.document.uri(),
            start = range.start,
            replaced_end = range.end,
            len = final_text.len(),
            "final write applied"
        );
        Ok(written)
    }

    /// Range the final write should replace, and whether the document
    /// already holds exactly `final_text` there.
    fn reconcile(&self, final_text: &str) -> (TextRange, bool) {
        let document = &self.shared.document;
        let tracked = self.shared.tracked();
        let range = TextRange::new(tracked.start, tracked.end);

        if !tracked.diverged && document.version() == tracked.own_version {
            return (range, tracked.expected == final_text);
        }

        if document.text_in(range).as_deref() == Some(tracked.expected.as_str()) {
            tracing::debug!(uri = document.uri(), "foreign edit left the region intact");
            return (range, tracked.expected == final_text);
        }

        let live = document.text();
        if let Some(moved) = relocate(&live, &tracked) {
            tracing::debug!(
                uri = document.uri(),
                from = tracked.start,
                to = moved.start,
                "foreign edit moved the region"
            );
            return (moved, tracked.expected == final_text);
        }

        let start = floor_char_boundary(&live, tracked.start.min(live.len()));
        if live[start..].starts_with(final_text) {
            return (TextRange::new(start, start + final_text.len()), true);
        }

        let bound = start + final_text.len().max(tracked.original_len);
        let end = floor_char_boundary(&live, bound.min(live.len()));
        tracing::warn!(
            uri = document.uri(),
            start,
            end,
            "document changed during the edit; overwriting up to a safe end"
        );
        (TextRange::new(start, end), false)
    }
}

/// Find the session's text after a foreign edit moved it: first at the
/// offset shifted by the document's length change, then as the only
/// occurrence of the expected text.
fn relocate(live: &str, tracked: &Tracked) -> Option<TextRange> {
    let expected = tracked.expected.as_str();
    if expected.is_empty() {
        return None;
    }
    let at = |start: usize| {
        live.get(start..start + expected.len())
            .filter(|found| *found == expected)
            .map(|_| TextRange::new(start, start + expected.len()))
    };

    let shifted = if live.len() >= tracked.doc_len {
        tracked.start.checked_add(live.len() - tracked.doc_len)
    } else {
        tracked.start.checked_sub(tracked.doc_len - live.len())
    };
    if let Some(range) = shifted.and_then(at) {
        return Some(range);
    }

    let mut matches = live.match_indices(expected);
    match (matches.next(), matches.next()) {
        (Some((start, _)), None) => at(start),
        _ => None,
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn run_worker(
    shared: Arc<Shared>,
    mut mailbox: watch::Receiver<Option<Pending>>,
    applied: watch::Sender<u64>,
    stop: CancellationToken,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            changed = mailbox.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        let pending = mailbox.borrow_and_update().clone();
        let Some(pending) = pending else {
            continue;
        };

        shared.busy.store(true, Ordering::SeqCst);
        shared.write(&pending.text, &cancel).await;
        shared.busy.store(false, Ordering::SeqCst);
        applied.send_replace(pending.seq);
    }
}

#[cfg(test)]
mod tests;
