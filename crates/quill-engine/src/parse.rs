//! Cleanup of raw model output before it is written to a document.

/// Remove a surrounding markdown fence. Safe on partial output: a fence that
/// is still arriving yields an empty body, and the closing fence is only
/// stripped when an opening fence was.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim_start();
    if trimmed.starts_with("```") {
        let body = match trimmed.find('\n') {
            Some(newline_idx) => &trimmed[newline_idx + 1..],
            None => "",
        };
        strip_closing_fence(body)
    } else if !trimmed.is_empty() && "```".starts_with(trimmed) {
        ""
    } else {
        raw
    }
}

fn strip_closing_fence(body: &str) -> &str {
    let trimmed = body.trim_end();
    match trimmed.strip_suffix("```") {
        Some(rest) if rest.is_empty() || rest.ends_with('\n') => rest,
        _ => body,
    }
}

/// Match the original region's trailing newline so replacing a region does
/// not join or split lines at its end.
pub fn normalize_trailing_newline(original: &str, content: String) -> String {
    let mut normalized = content;
    if original.ends_with('\n') {
        if !normalized.ends_with('\n') {
            if original.ends_with("\r\n") {
                normalized.push_str("\r\n");
            } else {
                normalized.push('\n');
            }
        }
    } else {
        while normalized.ends_with('\n') {
            let cut = if normalized.ends_with("\r\n") { 2 } else { 1 };
            normalized.truncate(normalized.len() - cut);
        }
    }
    normalized
}

/// Final text for a region: fences stripped, trailing newline matched.
pub fn finalize_output(raw: &str, original: &str) -> String {
    normalize_trailing_newline(original, strip_code_fences(raw).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_fenced_block() {
        assert_eq!(strip_code_fences("```html\n<p>hi</p>\n```"), "<p>hi</p>\n");
        assert_eq!(strip_code_fences("```\nfn a() {}\n```\n"), "fn a() {}\n");
    }

    #[test]
    fn test_unfenced_output_untouched() {
        assert_eq!(strip_code_fences("fn a() {}\n"), "fn a() {}\n");
        // Closing fence without an opening one belongs to the content.
        assert_eq!(strip_code_fences("text\n```"), "text\n```");
    }

    #[test]
    fn test_partial_fences_while_streaming() {
        assert_eq!(strip_code_fences("`"), "");
        assert_eq!(strip_code_fences("```ht"), "");
        assert_eq!(strip_code_fences("```html\n<di"), "<di");
    }

    #[test]
    fn test_inline_backticks_at_end_are_kept() {
        assert_eq!(strip_code_fences("```md\nuse ```"), "use ```");
    }

    #[test]
    fn test_trailing_newline_matching() {
        assert_eq!(normalize_trailing_newline("a\n", "b".to_string()), "b\n");
        assert_eq!(normalize_trailing_newline("a\r\n", "b".to_string()), "b\r\n");
        assert_eq!(normalize_trailing_newline("a", "b\n\n".to_string()), "b");
        assert_eq!(normalize_trailing_newline("a\n", "b\n".to_string()), "b\n");
    }

    #[test]
    fn test_finalize_output() {
        assert_eq!(
            finalize_output("```rust\nfn a() {}\n```", "fn a() { todo!() }\n"),
            "fn a() {}\n"
        );
    }
}
