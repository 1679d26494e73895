use super::*;
use quill_core::{BoxFuture, MemoryDocument, Position};
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::sync::mpsc;

const BEFORE: &str = "<header>\n  <h1>Shop</h1>\n</header>\n";
const REGION: &str = "<main>\n  <p>old</p>\n</main>\n";
const AFTER: &str = "<footer>\n  <p>&copy; 2024</p>\n</footer>\n";

fn page() -> (Arc<MemoryDocument>, TextRange) {
    let doc = Arc::new(MemoryDocument::new(
        "mem://index.html",
        format!("{BEFORE}{REGION}{AFTER}"),
    ));
    (doc, TextRange::new(BEFORE.len(), BEFORE.len() + REGION.len()))
}

fn generated(rows: usize) -> String {
    let mut text = String::from("<main>\n");
    for i in 0..rows {
        text.push_str(&format!("  <p>row {i} of the generated listing</p>\n"));
    }
    text.push_str("</main>\n");
    text
}

/// Every `step`-char prefix of `text`, ending with `text` itself.
fn prefixes(text: &str, step: usize) -> Vec<String> {
    let mut out: Vec<String> = text
        .char_indices()
        .map(|(i, _)| i)
        .skip(step)
        .step_by(step)
        .map(|i| text[..i].to_string())
        .collect();
    out.push(text.to_string());
    out
}

fn attach(doc: &Arc<MemoryDocument>, range: TextRange, threshold: usize) -> StreamSession {
    let handle: Arc<dyn DocumentHandle> = doc.clone();
    StreamSession::attach(
        handle,
        range,
        SyncSettings {
            write_threshold_chars: threshold,
            ..SyncSettings::default()
        },
        None,
        CancellationToken::new(),
    )
}

/// Document whose edits take a while to land.
struct SlowDocument {
    inner: MemoryDocument,
    delay: Duration,
}

impl DocumentHandle for SlowDocument {
    fn uri(&self) -> &str {
        self.inner.uri()
    }

    fn text(&self) -> String {
        self.inner.text()
    }

    fn text_in(&self, range: TextRange) -> Option<String> {
        self.inner.text_in(range)
    }

    fn replace<'a>(&'a self, range: TextRange, text: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.inner.replace(range, text).await
        })
    }

    fn offset_at(&self, position: Position) -> usize {
        self.inner.offset_at(position)
    }

    fn position_at(&self, offset: usize) -> Position {
        self.inner.position_at(offset)
    }

    fn line_count(&self) -> usize {
        self.inner.line_count()
    }

    fn version(&self) -> u64 {
        self.inner.version()
    }
}

#[tokio::test]
async fn test_converges_on_last_delta_after_flush() {
    let (doc, range) = page();
    let mut session = attach(&doc, range, DEFAULT_WRITE_THRESHOLD_CHARS);
    let final_text = generated(30);

    for delta in prefixes(&final_text, 7) {
        session.on_delta(&delta);
        tokio::task::yield_now().await;
    }
    session.flush().await.unwrap();

    assert_eq!(doc.text(), format!("{BEFORE}{final_text}{AFTER}"));
    assert_eq!(
        session.range(),
        TextRange::new(range.start, range.start + final_text.len())
    );
    assert!(!session.is_busy());
}

#[tokio::test]
async fn test_writes_are_throttled() {
    let (doc, range) = page();
    let mut session = attach(&doc, range, DEFAULT_WRITE_THRESHOLD_CHARS);
    let final_text = "x".repeat(1_000);

    let deltas = prefixes(&final_text, 10);
    for delta in &deltas {
        session.on_delta(delta);
        tokio::task::yield_now().await;
    }
    session.flush().await.unwrap();

    let stats = session.stats();
    assert!(stats.writes >= 2);
    assert!(stats.writes <= 1_000 / DEFAULT_WRITE_THRESHOLD_CHARS + 1);
    assert!(stats.writes < deltas.len());
    assert_eq!(doc.replace_calls(), stats.writes);
    assert_eq!(doc.text(), format!("{BEFORE}{final_text}{AFTER}"));
}

#[tokio::test]
async fn test_unconsumed_deltas_are_overwritten_not_queued() {
    let (doc, range) = page();
    let mut session = attach(&doc, range, 1);
    let final_text = generated(20);

    // No yields: the worker never sees the intermediate states.
    for delta in prefixes(&final_text, 40) {
        session.on_delta(&delta);
    }
    session.flush().await.unwrap();

    assert_eq!(session.stats().writes, 1);
    assert_eq!(doc.text(), format!("{BEFORE}{final_text}{AFTER}"));
}

#[tokio::test(start_paused = true)]
async fn test_flush_waits_for_in_flight_write() {
    let slow = Arc::new(SlowDocument {
        inner: MemoryDocument::new("mem://slow", format!("{BEFORE}{REGION}{AFTER}")),
        delay: Duration::from_millis(200),
    });
    let range = TextRange::new(BEFORE.len(), BEFORE.len() + REGION.len());
    let handle: Arc<dyn DocumentHandle> = slow.clone();
    let mut session = StreamSession::attach(
        handle,
        range,
        SyncSettings {
            write_threshold_chars: 1,
            ..SyncSettings::default()
        },
        None,
        CancellationToken::new(),
    );

    session.on_delta("<main>\n  <p>first</p>\n");
    tokio::task::yield_now().await;
    assert!(session.is_busy());

    // Arrives while the first write is in flight.
    session.on_delta("<main>\n  <p>first</p>\n  <p>second</p>\n</main>\n");
    session.flush().await.unwrap();

    assert!(!session.is_busy());
    assert_eq!(
        slow.text(),
        format!("{BEFORE}<main>\n  <p>first</p>\n  <p>second</p>\n</main>\n{AFTER}")
    );
    assert_eq!(session.stats().writes, 2);
}

#[tokio::test]
async fn test_finish_writes_authoritative_text() {
    let (doc, range) = page();
    let mut session = attach(&doc, range, 8);
    let raw = generated(5);
    for delta in prefixes(&raw, 9) {
        session.on_delta(&delta);
        tokio::task::yield_now().await;
    }

    let final_text = "<main>\n  <p>cleaned</p>\n</main>\n";
    let written = session.finish(final_text).await.unwrap();

    assert_eq!(doc.text(), format!("{BEFORE}{final_text}{AFTER}"));
    assert_eq!(
        written,
        TextRange::new(range.start, range.start + final_text.len())
    );
}

#[tokio::test]
async fn test_finish_without_partial_writes_replaces_original_region() {
    let (doc, range) = page();
    let session = attach(&doc, range, DEFAULT_WRITE_THRESHOLD_CHARS);
    let final_text = "<main>\n  <p>new</p>\n</main>\n";
    session.finish(final_text).await.unwrap();
    assert_eq!(doc.text(), format!("{BEFORE}{final_text}{AFTER}"));
    assert_eq!(doc.replace_calls(), 1);
}

#[tokio::test]
async fn test_finish_skips_write_when_text_already_in_place() {
    let (doc, range) = page();
    let mut session = attach(&doc, range, 1);
    let final_text = generated(3);
    session.on_delta(&final_text);
    session.flush().await.unwrap();
    session.finish(&final_text).await.unwrap();
    assert_eq!(doc.replace_calls(), 1);
}

#[tokio::test]
async fn test_foreign_edit_outside_region_is_preserved() {
    let (doc, range) = page();
    let mut session = attach(&doc, range, 1);
    session.on_delta("<main>\n  <p>partial");
    session.flush().await.unwrap();

    // The user appends to the end of the file mid-stream.
    let mut text = doc.text();
    text.push_str("<!-- user note -->\n");
    doc.set_text(text);

    session.on_delta("<main>\n  <p>partial output</p>");
    session.flush().await.unwrap();
    assert!(session.stats().diverged);

    let final_text = "<main>\n  <p>partial output</p>\n</main>\n";
    session.finish(final_text).await.unwrap();
    assert_eq!(
        doc.text(),
        format!("{BEFORE}{final_text}{AFTER}<!-- user note -->\n")
    );
}

#[tokio::test]
async fn test_foreign_edit_above_region_moves_final_write() {
    let (doc, range) = page();
    let mut session = attach(&doc, range, 1);
    session.on_delta("<main>\n  <p>par");
    session.flush().await.unwrap();

    // The user adds a line above the region mid-stream.
    doc.set_text(format!("<!-- note -->\n{}", doc.text()));

    let final_text = "<main>\n  <p>paragraph</p>\n</main>\n";
    session.finish(final_text).await.unwrap();
    assert_eq!(
        doc.text(),
        format!("<!-- note -->\n{BEFORE}{final_text}{AFTER}")
    );
}

#[tokio::test]
async fn test_foreign_edits_around_region_find_it_by_content() {
    let (doc, range) = page();
    let mut session = attach(&doc, range, 1);
    session.on_delta("<main>\n  <p>par");
    session.flush().await.unwrap();

    doc.set_text(format!("<!-- top -->\n{}<!-- bottom note -->\n", doc.text()));

    let final_text = "<main>\n  <p>paragraph</p>\n</main>\n";
    session.finish(final_text).await.unwrap();
    assert_eq!(
        doc.text(),
        format!("<!-- top -->\n{BEFORE}{final_text}{AFTER}<!-- bottom note -->\n")
    );
}

#[tokio::test]
async fn test_foreign_edit_inside_region_uses_bounded_overwrite() {
    let (doc, range) = page();
    let mut session = attach(&doc, range, 1);
    session.on_delta("<main>\n  <p>par");
    session.flush().await.unwrap();

    let edited = format!("{BEFORE}<main>\n  <p>USER EDIT HERE</p>\n</main>\n{AFTER}");
    doc.set_text(edited.clone());

    let final_text = "<main>\n  <p>generated</p>\n</main>\n";
    session.finish(final_text).await.unwrap();

    let bound = range.start + final_text.len().max(REGION.len());
    let expected = format!("{BEFORE}{final_text}{}", &edited[bound..]);
    assert_eq!(doc.text(), expected);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_partial_write_is_recovered_by_final_write() {
    let (doc, range) = page();
    let mut session = attach(&doc, range, 1);
    doc.reject_next(WritePolicy::default().attempts as usize);

    session.on_delta("<main>\n  <p>partial");
    session.flush().await.unwrap();
    assert_eq!(session.stats().failed_writes, 1);
    assert_eq!(doc.text(), format!("{BEFORE}{REGION}{AFTER}"));

    let final_text = "<main>\n  <p>done</p>\n</main>\n";
    session.finish(final_text).await.unwrap();
    assert_eq!(doc.text(), format!("{BEFORE}{final_text}{AFTER}"));
}

#[tokio::test]
async fn test_cancelled_session_stops_writing() {
    let (doc, range) = page();
    let cancel = CancellationToken::new();
    let handle: Arc<dyn DocumentHandle> = doc.clone();
    let mut session = StreamSession::attach(
        handle,
        range,
        SyncSettings::default(),
        None,
        cancel.clone(),
    );
    cancel.cancel();

    session.on_delta(&generated(10));
    assert_eq!(session.flush().await, Err(DocumentError::Cancelled));
    assert_eq!(
        session.finish("anything").await,
        Err(DocumentError::Cancelled)
    );
    assert_eq!(doc.replace_calls(), 0);
}

#[tokio::test]
async fn test_progress_events_report_written_chars() {
    let (doc, range) = page();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle: Arc<dyn DocumentHandle> = doc.clone();
    let mut session = StreamSession::attach(
        handle,
        range,
        SyncSettings {
            write_threshold_chars: 1,
            ..SyncSettings::default()
        },
        Some(tx),
        CancellationToken::new(),
    );
    session.on_delta("<main>héllo");
    session.flush().await.unwrap();

    assert_eq!(
        rx.try_recv().unwrap(),
        EditEvent::Progress { chars_written: 11 }
    );
}
