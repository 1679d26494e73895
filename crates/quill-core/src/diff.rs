//! Line-level change summary for completed edits.

use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiffSummary {
    pub lines_added: usize,
    pub lines_removed: usize,
    pub chars_before: usize,
    pub chars_after: usize,
}

impl DiffSummary {
    pub fn between(before: &str, after: &str) -> Self {
        let diff = TextDiff::from_lines(before, after);
        let (lines_added, lines_removed) =
            diff.iter_all_changes()
                .fold((0, 0), |(added, removed), change| match change.tag() {
                    ChangeTag::Insert => (added + 1, removed),
                    ChangeTag::Delete => (added, removed + 1),
                    ChangeTag::Equal => (added, removed),
                });
        Self {
            lines_added,
            lines_removed,
            chars_before: before.chars().count(),
            chars_after: after.chars().count(),
        }
    }

    pub fn is_unchanged(&self) -> bool {
        self.lines_added == 0 && self.lines_removed == 0
    }

    /// Short label such as `+3 -1 lines`.
    pub fn label(&self) -> String {
        format!("+{} -{} lines", self.lines_added, self.lines_removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_changed_lines() {
        let before = "a\nb\nc\n";
        let after = "a\nB\nc\nd\n";
        let summary = DiffSummary::between(before, after);
        assert_eq!(summary.lines_added, 2);
        assert_eq!(summary.lines_removed, 1);
        assert_eq!(summary.chars_before, 6);
        assert_eq!(summary.chars_after, 8);
        assert_eq!(summary.label(), "+2 -1 lines");
    }

    #[test]
    fn test_identical_text_is_unchanged() {
        assert!(DiffSummary::between("same\n", "same\n").is_unchanged());
    }
}
