//! Truncation heuristic for generated code.
//!
//! This is a delimiter count, not a parser. Declaring truncated output complete
//! is acceptable; declaring complete output truncated costs one extra
//! continuation round.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Output shorter than this (in chars) is always treated as complete.
pub const MIN_JUDGEABLE_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentKind {
    /// HTML, XML, SVG
    Markup,
    /// Brace-delimited programming languages
    Script,
    /// CSS and its preprocessors
    StyleSheet,
    /// JSX/TSX, Vue, Svelte
    Component,
    Other,
}

impl ContentKind {
    /// Map an editor language identifier (`"typescriptreact"`, `"html"`, ...).
    pub fn from_language_id(id: &str) -> Self {
        match id.to_ascii_lowercase().as_str() {
            "html" | "xhtml" | "xml" | "svg" | "xsl" | "markdown-html" => ContentKind::Markup,
            "css" | "scss" | "sass" | "less" | "stylus" => ContentKind::StyleSheet,
            "javascriptreact" | "typescriptreact" | "jsx" | "tsx" | "vue" | "svelte"
            | "astro" => ContentKind::Component,
            "javascript" | "typescript" | "rust" | "go" | "java" | "kotlin" | "c" | "cpp"
            | "csharp" | "swift" | "php" | "json" | "jsonc" | "dart" | "scala" => {
                ContentKind::Script
            }
            _ => ContentKind::Other,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "html" | "htm" | "xhtml" | "xml" | "svg" => ContentKind::Markup,
            "css" | "scss" | "sass" | "less" | "styl" => ContentKind::StyleSheet,
            "jsx" | "tsx" | "vue" | "svelte" | "astro" => ContentKind::Component,
            "js" | "mjs" | "cjs" | "ts" | "rs" | "go" | "java" | "kt" | "c" | "h" | "cc"
            | "cpp" | "hpp" | "cs" | "swift" | "php" | "json" | "dart" | "scala" => {
                ContentKind::Script
            }
            _ => ContentKind::Other,
        }
    }
}

/// Whether generation appears to have stopped before the output was done.
pub fn looks_incomplete(text: &str, kind: ContentKind) -> bool {
    if text.chars().count() < MIN_JUDGEABLE_CHARS {
        return false;
    }

    match kind {
        ContentKind::Markup => match root_element(text) {
            Some(root) if root.self_closing => false,
            Some(root) => !has_closing_tag(text, &root.name),
            None => has_unclosed_delimiters(text),
        },
        ContentKind::Script | ContentKind::StyleSheet | ContentKind::Component | ContentKind::Other => {
            has_unclosed_delimiters(text)
        }
    }
}

/// More `{ [ (` than `} ] )` in the text.
pub fn has_unclosed_delimiters(text: &str) -> bool {
    let (opens, closes) = text.chars().fold((0usize, 0usize), |(o, c), ch| match ch {
        '{' | '[' | '(' => (o + 1, c),
        '}' | ']' | ')' => (o, c + 1),
        _ => (o, c),
    });
    opens > closes
}

/// Elements that never take a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

#[derive(Debug, PartialEq, Eq)]
struct RootElement {
    name: String,
    self_closing: bool,
}

/// First real element in the text, skipping declarations, doctypes and
/// comments. Void roots are ignored so the delimiter check decides instead.
fn root_element(text: &str) -> Option<RootElement> {
    let mut rest = text;
    while let Some(lt) = rest.find('<') {
        let after = &rest[lt + 1..];
        if after.starts_with("!--") {
            let close = after.find("-->")?;
            rest = &after[close + 3..];
            continue;
        }
        if after.starts_with('!') || after.starts_with('?') || after.starts_with('/') {
            rest = after;
            continue;
        }

        let name: String = after
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
            .collect();
        if name.is_empty() || !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
            rest = after;
            continue;
        }
        if VOID_ELEMENTS.contains(&name.to_ascii_lowercase().as_str()) {
            return None;
        }

        let tag_end = after.find('>');
        let self_closing = tag_end
            .map(|end| after[..end].trim_end().ends_with('/'))
            .unwrap_or(false);
        return Some(RootElement { name, self_closing });
    }
    None
}

fn has_closing_tag(text: &str, name: &str) -> bool {
    let needle = format!("</{}", name.to_ascii_lowercase());
    text.to_ascii_lowercase()
        .match_indices(&needle)
        .any(|(i, _)| {
            let after = &text[i + needle.len()..];
            after
                .chars()
                .next()
                .map(|c| c == '>' || c.is_whitespace())
                .unwrap_or(false)
        })
}
