//! Diff-aware comment validation.
//!
//! Builds a per-file index of line numbers that exist in the new
//! version of the diff, tagged added or context. Only added lines are
//! eligible for inline comments; context lines are tracked so rejection
//! reasons can point at the nearest commentable range.

pub mod paths;

use std::collections::BTreeMap;

use indexmap::IndexMap;
use tracing::debug;

use crate::diff::parse_unified_diff;
use crate::models::diff::DiffLineType;

pub use paths::{normalize_path, resolve_path};

/// Tag for a line present in the new file version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineTag {
    Added,
    Context,
}

/// Per-file line index built from one diff.
#[derive(Debug, Default)]
struct FileIndex {
    /// New-file line number to tag, for every line the diff shows.
    lines: BTreeMap<u32, LineTag>,
    /// Merged maximal ranges of added lines, ascending.
    added_ranges: Vec<(u32, u32)>,
}

/// Index of valid comment locations for one diff.
///
/// Built once per review; read-only afterward. An unparseable diff
/// yields an empty index, which rejects every located comment while
/// callers still accept comments with no location.
#[derive(Debug, Default)]
pub struct ValidityIndex {
    files: IndexMap<String, FileIndex>,
}

/// Outcome of a location check, with a human-readable rejection reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validity {
    Valid,
    FileNotInDiff,
    NoModifiedLines,
    LineNotModified {
        /// Closest range of modified lines in the same file.
        nearest: (u32, u32),
    },
}

impl ValidityIndex {
    /// Build the index from a unified diff string.
    pub fn build(diff: &str) -> Self {
        let parsed = parse_unified_diff(diff);
        if parsed.is_empty() {
            debug!("diff did not parse, validity index is empty");
            return Self::default();
        }

        let mut files = IndexMap::new();
        for file in &parsed {
            if file.is_binary || file.is_deleted {
                continue;
            }
            let mut index = FileIndex::default();
            for hunk in &file.hunks {
                for line in &hunk.lines {
                    let (tag, no) = match line.line_type {
                        DiffLineType::Added => (LineTag::Added, line.new_line_no),
                        DiffLineType::Context => (LineTag::Context, line.new_line_no),
                        DiffLineType::Removed => continue,
                    };
                    if let Some(no) = no {
                        index.lines.insert(no, tag);
                    }
                }
            }
            index.added_ranges = merge_ranges(
                index
                    .lines
                    .iter()
                    .filter(|(_, t)| **t == LineTag::Added)
                    .map(|(n, _)| *n),
            );
            files.insert(file.path().to_string(), index);
        }

        Self { files }
    }

    /// Whether `file:line` lands on a line added by this diff.
    pub fn is_valid(&self, file: &str, line: u32) -> bool {
        matches!(self.check(file, line), Validity::Valid)
    }

    /// Whether the file appears in the diff at all.
    pub fn file_in_diff(&self, file: &str) -> bool {
        self.lookup(file).is_some()
    }

    /// Check a location, classifying the failure if invalid.
    pub fn check(&self, file: &str, line: u32) -> Validity {
        let Some(index) = self.lookup(file) else {
            return Validity::FileNotInDiff;
        };
        if index.lines.get(&line) == Some(&LineTag::Added) {
            return Validity::Valid;
        }
        match nearest_range(&index.added_ranges, line) {
            Some(nearest) => Validity::LineNotModified { nearest },
            None => Validity::NoModifiedLines,
        }
    }

    /// Human-readable rejection reason for a location.
    pub fn reason(&self, file: &str, line: u32) -> String {
        match self.check(file, line) {
            Validity::Valid => format!("{file}:{line} is a modified line"),
            Validity::FileNotInDiff => format!("file {file} is not part of the diff"),
            Validity::NoModifiedLines => format!("file {file} has no modified lines"),
            Validity::LineNotModified { nearest: (a, b) } => {
                format!("line {line} in {file} was not modified (nearest modified lines: {a}-{b})")
            }
        }
    }

    /// Resolve a model-reported path to an indexed file.
    fn lookup(&self, file: &str) -> Option<&FileIndex> {
        let normalized = normalize_path(file);
        let resolved = resolve_path(&normalized, self.files.keys().map(String::as_str))?;
        self.files.get(&resolved)
    }
}

/// Merge ascending line numbers into maximal contiguous ranges.
fn merge_ranges(lines: impl Iterator<Item = u32>) -> Vec<(u32, u32)> {
    let mut ranges: Vec<(u32, u32)> = Vec::new();
    for no in lines {
        match ranges.last_mut() {
            Some((_, end)) if *end + 1 == no => *end = no,
            _ => ranges.push((no, no)),
        }
    }
    ranges
}

/// The range closest to `line` by distance to its nearer edge.
fn nearest_range(ranges: &[(u32, u32)], line: u32) -> Option<(u32, u32)> {
    ranges
        .iter()
        .copied()
        .min_by_key(|&(start, end)| {
            if line < start {
                start - line
            } else if line > end {
                line - end
            } else {
                0
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIFF: &str = "diff --git a/src/handler.rs b/src/handler.rs\n\
        index 1234567..abcdefg 100644\n\
        --- a/src/handler.rs\n\
        +++ b/src/handler.rs\n\
        @@ -10,6 +10,8 @@ fn handle() {\n \
        let a = 1;\n \
        let b = 2;\n\
        +let c = 3;\n\
        +let d = 4;\n \
        let e = 5;\n\
        -let old = 0;\n \
        let f = 6;\n";

    #[test]
    fn added_lines_are_valid_context_lines_are_not() {
        let index = ValidityIndex::build(DIFF);
        assert!(index.is_valid("src/handler.rs", 12));
        assert!(index.is_valid("src/handler.rs", 13));
        assert!(!index.is_valid("src/handler.rs", 10));
        assert!(!index.is_valid("src/handler.rs", 11));
    }

    #[test]
    fn missing_file_is_invalid() {
        let index = ValidityIndex::build(DIFF);
        assert!(!index.is_valid("src/other.rs", 12));
        assert!(!index.file_in_diff("src/other.rs"));
        assert_eq!(index.check("src/other.rs", 12), Validity::FileNotInDiff);
    }

    #[test]
    fn reason_names_nearest_range() {
        let index = ValidityIndex::build(DIFF);
        let reason = index.reason("src/handler.rs", 50);
        assert!(reason.contains("nearest modified lines: 12-13"), "{reason}");
    }

    #[test]
    fn reason_for_file_without_additions() {
        let diff = "diff --git a/gone.rs b/gone.rs\n--- a/gone.rs\n+++ b/gone.rs\n@@ -1,3 +1,2 @@\n context\n-removed\n context2\n";
        let index = ValidityIndex::build(diff);
        assert_eq!(index.check("gone.rs", 1), Validity::NoModifiedLines);
        assert!(index.reason("gone.rs", 1).contains("no modified lines"));
    }

    #[test]
    fn lookup_accepts_model_path_shapes() {
        let index = ValidityIndex::build(DIFF);
        assert!(index.is_valid("a/src/handler.rs", 12));
        assert!(index.is_valid("handler.rs", 12));
        assert!(index.is_valid("[handler](src/handler.rs)", 12));
        assert!(index.is_valid("https://github.com/org/repo/blob/main/src/handler.rs", 12));
    }

    #[test]
    fn unparseable_diff_yields_empty_index() {
        let index = ValidityIndex::build("garbage, not a diff");
        assert!(!index.is_valid("anything.rs", 1));
        assert!(!index.file_in_diff("anything.rs"));
    }

    #[test]
    fn build_is_idempotent() {
        let a = ValidityIndex::build(DIFF);
        let b = ValidityIndex::build(DIFF);
        for line in 1..60 {
            assert_eq!(
                a.is_valid("src/handler.rs", line),
                b.is_valid("src/handler.rs", line)
            );
        }
    }

    #[test]
    fn merge_ranges_joins_adjacent() {
        assert_eq!(merge_ranges([1, 2, 3, 7, 8, 12].into_iter()), vec![(1, 3), (7, 8), (12, 12)]);
        assert!(merge_ranges(std::iter::empty()).is_empty());
    }

    #[test]
    fn nearest_range_picks_closest_edge() {
        let ranges = [(5, 8), (20, 22)];
        assert_eq!(nearest_range(&ranges, 10), Some((5, 8)));
        assert_eq!(nearest_range(&ranges, 17), Some((20, 22)));
        assert_eq!(nearest_range(&ranges, 6), Some((5, 8)));
        assert_eq!(nearest_range(&[], 6), None);
    }

    #[test]
    fn removed_lines_never_valid() {
        let index = ValidityIndex::build(DIFF);
        // line 14 is context (let e), 15 removed then context shifts
        assert!(!index.is_valid("src/handler.rs", 14));
    }
}
