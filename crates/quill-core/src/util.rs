/// Truncate a string for display (Unicode-safe)
pub fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

/// Last `max_chars` chars of `s`.
pub fn tail_chars(s: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return "";
    }
    match s.char_indices().rev().nth(max_chars - 1) {
        Some((byte_idx, _)) => &s[byte_idx..],
        None => s,
    }
}

/// Rough token count for budgeting (four chars per token, rounded up).
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(4).min(u32::MAX as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_str_unicode_safe() {
        assert_eq!(truncate_str("错误: 失败 😊", 5), "错误: 失");
        assert_eq!(truncate_str("ok", 10), "ok");
    }

    #[test]
    fn test_tail_chars() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("ab", 5), "ab");
        assert_eq!(tail_chars("日本語", 2), "本語");
        assert_eq!(tail_chars("abc", 0), "");
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
