//! Target-region selection.
//!
//! Decides which part of a document an edit may touch: the user's selection,
//! an auto-detected section of a large file, or the whole file. Auto-section
//! detection is keyword scoring plus a nesting scan, not an AST lookup; it
//! keeps small asks on large files from regenerating everything.

pub mod section;

use crate::document::{ceil_char_boundary, floor_char_boundary, LineIndex, TextRange};
use section::{classify, expand_section, LineClass};
use serde::{Deserialize, Serialize};

/// Lines of read-only context captured on each side of the region.
pub const CONTEXT_WINDOW_LINES: usize = 20;
/// Files with more lines than this are candidates for auto-section.
pub const AUTO_SECTION_MIN_LINES: usize = 80;
/// Minimum line score for an auto-section anchor.
pub const MIN_ANCHOR_SCORE: u32 = 2;

const STRUCTURAL_WEIGHT: u32 = 3;
const KEYWORD_WEIGHT: u32 = 1;
const BLOCK_START_BONUS: u32 = 1;

/// Common UI/section names. Matched against the instruction first; only the
/// ones the instruction mentions are scored.
const STRUCTURAL_TERMS: &[&str] = &[
    "nav", "navbar", "navigation", "header", "footer", "sidebar", "modal", "dialog", "card",
    "table", "form", "menu", "hero", "banner", "section", "toolbar", "tabs", "panel", "grid",
    "button", "search", "login", "signup", "pricing", "gallery", "carousel", "slider",
    "accordion", "dropdown", "breadcrumb", "pagination", "tooltip", "alert", "toast", "list",
];

const STOP_WORDS: &[&str] = &[
    "the", "and", "add", "make", "change", "update", "please", "this", "that", "with", "for",
    "from", "into", "use", "using", "should", "would", "could", "can", "new", "some", "more",
    "less", "them", "then", "than", "also", "just", "file", "code", "like", "want", "need",
    "all", "any", "each", "every", "when", "where", "which", "there", "their", "have", "has",
    "was", "were", "are", "fix", "remove", "delete", "create", "implement", "improve",
    "refactor", "rename", "move", "set", "get", "instead", "only", "but", "not", "does",
    "our", "your", "you", "its", "support", "handle", "better", "bigger", "smaller",
    "way", "other", "sure", "let", "lets", "give", "put", "show", "hide", "work", "works",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionMode {
    Selection,
    AutoSection,
    WholeFile,
}

impl RegionMode {
    pub fn label(&self) -> &'static str {
        match self {
            RegionMode::Selection => "selection",
            RegionMode::AutoSection => "auto-section",
            RegionMode::WholeFile => "whole file",
        }
    }
}

/// Line span `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSpan {
    pub start: usize,
    pub end: usize,
}

/// The part of a document one edit operation is allowed to rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRegion {
    pub mode: RegionMode,
    /// Byte range at selection time. Streaming shifts the live end offset;
    /// this stays the logical region.
    pub range: TextRange,
    pub lines: LineSpan,
    /// Read-only text just above the region.
    pub context_before: String,
    /// Read-only text just below the region.
    pub context_after: String,
    /// Highest-scoring line for auto-sections.
    pub anchor_line: Option<usize>,
}

impl TargetRegion {
    pub fn whole_file(text: &str) -> Self {
        let index = LineIndex::new(text);
        Self {
            mode: RegionMode::WholeFile,
            range: TextRange::new(0, text.len()),
            lines: LineSpan {
                start: 0,
                end: index.line_count(),
            },
            context_before: String::new(),
            context_after: String::new(),
            anchor_line: None,
        }
    }

    pub fn original_text<'a>(&self, document_text: &'a str) -> &'a str {
        document_text
            .get(self.range.start..self.range.end)
            .unwrap_or_default()
    }
}

/// Pick the region for an edit.
///
/// A non-empty `selection` always wins. Otherwise files longer than
/// `AUTO_SECTION_MIN_LINES` are scanned for a section the instruction talks
/// about; anything else (or a scan with no convincing anchor) edits the whole
/// file.
pub fn select_region(text: &str, selection: Option<TextRange>, instruction: &str) -> TargetRegion {
    let index = LineIndex::new(text);

    // Offsets inside a multi-byte char widen to cover the whole char.
    let selection = selection
        .filter(|s| s.end <= text.len())
        .map(|s| {
            TextRange::new(
                floor_char_boundary(text, s.start),
                ceil_char_boundary(text, s.end),
            )
        });
    if let Some(selection) = selection.filter(|s| !s.is_empty()) {
        return selection_region(text, &index, selection);
    }

    if index.line_count() > AUTO_SECTION_MIN_LINES {
        if let Some(region) = auto_section_region(text, &index, instruction) {
            return region;
        }
    }

    TargetRegion::whole_file(text)
}

fn selection_region(text: &str, index: &LineIndex, selection: TextRange) -> TargetRegion {
    let start_line = index.line_of(selection.start);
    let end_line = {
        let last = index.line_of(selection.end);
        if index.line_start(last) == selection.end && last > start_line {
            last
        } else {
            last + 1
        }
    };
    let lines = LineSpan {
        start: start_line,
        end: end_line,
    };

    let (context_before, context_after) = surrounding_context(text, index, selection, lines);
    TargetRegion {
        mode: RegionMode::Selection,
        range: selection,
        lines,
        context_before,
        context_after,
        anchor_line: None,
    }
}

fn auto_section_region(text: &str, index: &LineIndex, instruction: &str) -> Option<TargetRegion> {
    let terms = InstructionTerms::extract(instruction);
    if terms.is_empty() {
        return None;
    }

    let lines: Vec<&str> = text.split('\n').collect();
    let (anchor, score) = best_anchor(&lines, &terms)?;
    if score < MIN_ANCHOR_SCORE {
        return None;
    }

    let bounds = expand_section(&lines, anchor);
    if bounds.start == 0 && bounds.end >= lines.len() {
        return None;
    }

    let range = TextRange::new(index.line_start(bounds.start), index.line_start(bounds.end));
    let span = LineSpan {
        start: bounds.start,
        end: bounds.end,
    };
    let (context_before, context_after) = surrounding_context(text, index, range, span);
    Some(TargetRegion {
        mode: RegionMode::AutoSection,
        range,
        lines: span,
        context_before,
        context_after,
        anchor_line: Some(anchor),
    })
}

fn surrounding_context(
    text: &str,
    index: &LineIndex,
    range: TextRange,
    lines: LineSpan,
) -> (String, String) {
    let before_start = index.line_start(lines.start.saturating_sub(CONTEXT_WINDOW_LINES));
    let after_end = index.line_start(lines.end + CONTEXT_WINDOW_LINES);
    let before = text.get(before_start..range.start).unwrap_or_default();
    let after = text.get(range.end..after_end.max(range.end)).unwrap_or_default();
    (before.to_string(), after.to_string())
}

/// Keywords pulled from an instruction, split by weight.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct InstructionTerms {
    pub structural: Vec<String>,
    pub keywords: Vec<String>,
}

impl InstructionTerms {
    pub fn extract(instruction: &str) -> Self {
        let mut terms = InstructionTerms::default();
        let lowered = instruction.to_lowercase();
        let words = lowered
            .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
            .map(|w| w.trim_matches('-'))
            .filter(|w| w.chars().count() >= 3 && !STOP_WORDS.contains(w));

        for word in words {
            let bucket = if STRUCTURAL_TERMS.contains(&word) {
                &mut terms.structural
            } else {
                &mut terms.keywords
            };
            if !bucket.iter().any(|w| w == word) {
                bucket.push(word.to_string());
            }
        }
        terms
    }

    pub fn is_empty(&self) -> bool {
        self.structural.is_empty() && self.keywords.is_empty()
    }
}

pub fn score_line(line: &str, terms: &InstructionTerms) -> u32 {
    let lowered = line.to_lowercase();
    let structural = terms
        .structural
        .iter()
        .filter(|t| lowered.contains(t.as_str()))
        .count() as u32;
    let keywords = terms
        .keywords
        .iter()
        .filter(|t| lowered.contains(t.as_str()))
        .count() as u32;

    let score = structural * STRUCTURAL_WEIGHT + keywords * KEYWORD_WEIGHT;
    if score > 0 && classify(line) == LineClass::BlockStart {
        score + BLOCK_START_BONUS
    } else {
        score
    }
}

/// Highest-scoring line; the earliest line wins ties.
fn best_anchor(lines: &[&str], terms: &InstructionTerms) -> Option<(usize, u32)> {
    let mut best: Option<(usize, u32)> = None;
    for (i, line) in lines.iter().enumerate() {
        let score = score_line(line, terms);
        if score == 0 {
            continue;
        }
        if best.map_or(true, |(_, top)| score > top) {
            best = Some((i, score));
        }
    }
    best
}
