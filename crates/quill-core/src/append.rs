//! Overlap-safe merging of model output fragments.
//!
//! Continuation calls are primed with the tail of earlier output and models
//! often echo part of it back. Merging looks for the longest suffix of the
//! assembled text that is also a prefix of the new fragment (greedy, largest
//! candidate first) and drops that echoed part.

/// Largest overlap considered, in chars.
pub const OVERLAP_WINDOW: usize = 500;

/// Merge `addition` onto `current` without duplicating echoed content.
pub fn append_with_overlap(current: &str, addition: &str) -> String {
    if current.is_empty() {
        return addition.to_string();
    }
    if addition.is_empty() {
        return current.to_string();
    }

    let overlap = overlap_len(current, addition);
    let mut merged = String::with_capacity(current.len() + addition.len() - overlap);
    merged.push_str(current);
    merged.push_str(&addition[overlap..]);
    merged
}

/// Byte length of the longest suffix of `current` that equals a prefix of
/// `addition`, bounded by `min(OVERLAP_WINDOW, chars(current), chars(addition))`.
pub fn overlap_len(current: &str, addition: &str) -> usize {
    let current_tail_chars = current.chars().rev().take(OVERLAP_WINDOW).count();

    let prefix_ends: Vec<usize> = addition
        .char_indices()
        .take(current_tail_chars)
        .map(|(i, c)| i + c.len_utf8())
        .collect();

    prefix_ends
        .into_iter()
        .rev()
        .find(|&end| current.ends_with(&addition[..end]))
        .unwrap_or(0)
}
