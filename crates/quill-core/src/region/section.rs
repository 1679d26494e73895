//! Line-oriented section scanner used by auto-section detection.
//!
//! Depth is a single counter over `{ [ (` and markup tags. It does not know
//! about strings, comments or generics beyond a crude guard (an opening `<`
//! directly after an identifier char is not a tag), so sections in unusual
//! code can come out a few lines too long or too short.

use regex::Regex;
use std::sync::LazyLock;

/// How far above the anchor a block start is searched for.
pub const MAX_BACKWARD_LINES: usize = 40;
/// Hard cap on section length, counted from the block start.
pub const MAX_FORWARD_LINES: usize = 60;

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

static DECLARATION: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(export\s+)?(default\s+)?(pub(\([^)]*\))?\s+)?(async\s+)?(fn|struct|enum|impl|trait|mod|class|interface|function|def|type|const|let|var)\b",
    )
    .ok()
});

static OPENING_TAG: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*<[A-Za-z][\w\-.:]*").ok());

static RULE_BLOCK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*[.#@:\w\[][^;{}]*\{\s*$").ok());

fn is_match(re: &LazyLock<Option<Regex>>, line: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(line))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    Blank,
    /// Declaration, opening tag or rule header: a plausible section start.
    BlockStart,
    Body,
}

pub fn classify(line: &str) -> LineClass {
    if line.trim().is_empty() {
        LineClass::Blank
    } else if is_match(&DECLARATION, line)
        || is_match(&OPENING_TAG, line)
        || is_match(&RULE_BLOCK, line)
    {
        LineClass::BlockStart
    } else {
        LineClass::Body
    }
}

/// Net nesting change contributed by one line.
pub fn depth_delta(line: &str) -> i32 {
    let mut delta = 0i32;
    let mut prev: Option<char> = None;
    for (i, c) in line.char_indices() {
        match c {
            '{' | '[' | '(' => delta += 1,
            '}' | ']' | ')' => delta -= 1,
            '<' => {
                let rest = &line[i + 1..];
                let after_ident = prev.is_some_and(|p| p.is_alphanumeric() || p == '_');
                if rest.starts_with('/') || !after_ident {
                    delta += tag_delta(rest);
                }
            }
            _ => {}
        }
        prev = Some(c);
    }
    delta
}

/// Contribution of a tag starting right after `<`.
fn tag_delta(rest: &str) -> i32 {
    if let Some(closing) = rest.strip_prefix('/') {
        return if closing.starts_with(|c: char| c.is_ascii_alphabetic()) {
            -1
        } else {
            0
        };
    }
    if !rest.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return 0;
    }

    let name: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
        .collect();
    if VOID_TAGS.contains(&name.to_ascii_lowercase().as_str()) {
        return 0;
    }
    let self_closing = rest
        .find('>')
        .map(|end| rest[..end].trim_end().ends_with('/'))
        .unwrap_or(false);
    if self_closing {
        0
    } else {
        1
    }
}

/// Line span `[start, end)` of a detected section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionBounds {
    pub start: usize,
    pub end: usize,
}

/// Grow a section around `anchor`: back to the nearest enclosing block start
/// (or paragraph break), then forward until nesting returns to the level it
/// started at.
pub fn expand_section(lines: &[&str], anchor: usize) -> SectionBounds {
    if lines.is_empty() {
        return SectionBounds { start: 0, end: 0 };
    }
    let anchor = anchor.min(lines.len() - 1);
    let start = find_block_start(lines, anchor);
    let end = find_block_end(lines, start, anchor);
    SectionBounds { start, end }
}

fn find_block_start(lines: &[&str], anchor: usize) -> usize {
    if classify(lines[anchor]) == LineClass::BlockStart && depth_delta(lines[anchor]) > 0 {
        return anchor;
    }

    let floor = anchor.saturating_sub(MAX_BACKWARD_LINES);
    let mut balance = 0i32;
    for i in (floor..anchor).rev() {
        balance += depth_delta(lines[i]);
        match classify(lines[i]) {
            // Opens more than the lines below it close: it encloses the anchor.
            LineClass::BlockStart if balance > 0 => return i,
            LineClass::Blank if balance == 0 => return i + 1,
            _ => {}
        }
    }
    floor
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Nothing opened yet; the section ends at the next paragraph break.
    Flat,
    /// Inside an opened block; the section ends when depth returns to zero.
    Nested,
}

fn find_block_end(lines: &[&str], start: usize, anchor: usize) -> usize {
    let limit = (start + MAX_FORWARD_LINES).max(anchor + 1).min(lines.len());
    let mut state = ScanState::Flat;
    let mut depth = 0i32;

    for i in start..limit {
        depth += depth_delta(lines[i]);
        if depth > 0 {
            state = ScanState::Nested;
        }
        if i < anchor {
            continue;
        }

        let next_is_break = lines
            .get(i + 1)
            .map_or(true, |next| classify(next) == LineClass::Blank);
        match state {
            ScanState::Nested if depth <= 0 => return i + 1,
            // Left the enclosing block without opening one of our own.
            ScanState::Flat if depth < 0 => return i.max(anchor + 1),
            ScanState::Flat if depth == 0 && next_is_break => return i + 1,
            _ => {}
        }
    }
    limit
}
