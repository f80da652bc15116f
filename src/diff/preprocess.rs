//! Diff preprocessor: shrinks a raw unified diff before token budgeting.
//!
//! Works on the raw text rather than the parsed form so that elision
//! markers survive into what the model actually sees. Per file segment:
//! binary bodies and pure-whitespace changes become one-line
//! placeholders, long deletion runs are folded, long context runs are
//! capped, and interior space runs can optionally be compressed.

use tracing::debug;

use crate::config::PreprocessConfig;

/// Placeholder for an elided binary file body.
const BINARY_PLACEHOLDER: &str = "[binary file change omitted]";

/// Placeholder for an elided whitespace-only change.
const WHITESPACE_PLACEHOLDER: &str = "[whitespace-only change omitted]";

/// Clean a raw unified diff according to the configured thresholds.
pub fn clean_diff(raw: &str, options: &PreprocessConfig) -> String {
    let mut out = String::with_capacity(raw.len());

    for segment in split_file_segments(raw) {
        out.push_str(&clean_segment(segment, options));
    }

    out
}

/// Split a raw diff into per-file segments on `diff --git` boundaries.
///
/// Text before the first boundary (if any) is returned as its own
/// segment and passed through untouched.
fn split_file_segments(raw: &str) -> Vec<&str> {
    let mut boundaries: Vec<usize> = Vec::new();
    let mut offset = 0;
    for line in raw.split_inclusive('\n') {
        if line.starts_with("diff --git ") {
            boundaries.push(offset);
        }
        offset += line.len();
    }

    let mut segments = Vec::with_capacity(boundaries.len() + 1);
    match boundaries.first() {
        None => segments.push(raw),
        Some(&first) => {
            if first > 0 {
                segments.push(&raw[..first]);
            }
            for pair in boundaries.windows(2) {
                segments.push(&raw[pair[0]..pair[1]]);
            }
            segments.push(&raw[*boundaries.last().expect("nonempty")..]);
        }
    }
    segments
}

/// Clean a single per-file segment.
fn clean_segment(segment: &str, options: &PreprocessConfig) -> String {
    if !segment.starts_with("diff --git ") {
        return segment.to_string();
    }

    if is_binary_segment(segment) {
        return placeholder_segment(segment, BINARY_PLACEHOLDER);
    }

    if options.elide_whitespace_only && is_whitespace_only_segment(segment) {
        debug!("eliding whitespace-only file segment");
        return placeholder_segment(segment, WHITESPACE_PLACEHOLDER);
    }

    let mut out = String::with_capacity(segment.len());
    let mut deleted_run: usize = 0;
    let mut context_run: usize = 0;
    let mut context_elided: usize = 0;

    let flush_deletes = |out: &mut String, run: &mut usize| {
        if *run > 0 {
            out.push_str(&format!("[... {run} lines deleted ...]\n"));
            *run = 0;
        }
    };
    let flush_context = |out: &mut String, elided: &mut usize| {
        if *elided > 0 {
            out.push_str(&format!("[... {elided} context lines elided ...]\n"));
            *elided = 0;
        }
    };

    for line in segment.lines() {
        let kind = classify_line(line);
        if kind != LineKind::Deletion && deleted_run > options.fold_deletes_over {
            flush_deletes(&mut out, &mut deleted_run);
        }
        if kind != LineKind::Context {
            flush_context(&mut out, &mut context_elided);
            context_run = 0;
        }

        match kind {
            LineKind::Deletion => {
                deleted_run += 1;
                if deleted_run <= options.fold_deletes_over {
                    push_line(&mut out, line, options);
                } else if deleted_run == options.fold_deletes_over + 1 {
                    // Retroactively fold: drop the lines we already kept
                    truncate_last_lines(&mut out, options.fold_deletes_over);
                }
            }
            LineKind::Context => {
                deleted_run = 0;
                context_run += 1;
                if context_run <= options.max_context_lines {
                    push_line(&mut out, line, options);
                } else {
                    context_elided += 1;
                }
            }
            LineKind::Added => {
                deleted_run = 0;
                push_line(&mut out, line, options);
            }
            LineKind::Header => {
                deleted_run = 0;
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    if deleted_run > options.fold_deletes_over {
        flush_deletes(&mut out, &mut deleted_run);
    }
    flush_context(&mut out, &mut context_elided);

    out
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum LineKind {
    Added,
    Deletion,
    Context,
    Header,
}

fn classify_line(line: &str) -> LineKind {
    if line.starts_with("+++") || line.starts_with("---") {
        LineKind::Header
    } else if line.starts_with('+') {
        LineKind::Added
    } else if line.starts_with('-') {
        LineKind::Deletion
    } else if line.starts_with(' ') || line.is_empty() {
        LineKind::Context
    } else {
        // diff --git, index, @@, mode lines, markers
        LineKind::Header
    }
}

/// Append a content line, optionally compressing interior space runs.
fn push_line(out: &mut String, line: &str, options: &PreprocessConfig) {
    if options.compress_spaces {
        out.push_str(&compress_interior_spaces(line));
    } else {
        out.push_str(line);
    }
    out.push('\n');
}

/// Drop the last `n` lines from `out` (used for retroactive folding).
fn truncate_last_lines(out: &mut String, n: usize) {
    for _ in 0..n {
        if let Some(pos) = out.trim_end_matches('\n').rfind('\n') {
            out.truncate(pos + 1);
        } else {
            out.clear();
            return;
        }
    }
}

/// Compress runs of 2+ interior spaces/tabs to a single space, keeping
/// the diff prefix character and the line's leading indentation intact.
fn compress_interior_spaces(line: &str) -> String {
    let (prefix, rest) = match line.chars().next() {
        Some(c @ ('+' | '-' | ' ')) => (&line[..c.len_utf8()], &line[c.len_utf8()..]),
        _ => ("", line),
    };

    let indent_end = rest
        .find(|c: char| c != ' ' && c != '\t')
        .unwrap_or(rest.len());
    let (indent, body) = rest.split_at(indent_end);

    let mut compressed = String::with_capacity(body.len());
    let mut in_run = false;
    for c in body.chars() {
        if c == ' ' || c == '\t' {
            if !in_run {
                compressed.push(' ');
                in_run = true;
            }
        } else {
            compressed.push(c);
            in_run = false;
        }
    }

    format!("{prefix}{indent}{compressed}")
}

/// Whether a segment describes a binary file change.
fn is_binary_segment(segment: &str) -> bool {
    segment
        .lines()
        .any(|l| l.contains("Binary files") || l.starts_with("GIT binary patch"))
}

/// Whether every changed line differs from its counterpart only in
/// whitespace: the deleted and added content, with all whitespace
/// stripped, must be identical (and there must be at least one change).
fn is_whitespace_only_segment(segment: &str) -> bool {
    let mut removed = String::new();
    let mut added = String::new();
    let mut changes = 0usize;

    for line in segment.lines() {
        match classify_line(line) {
            LineKind::Deletion => {
                removed.extend(line[1..].chars().filter(|c| !c.is_whitespace()));
                changes += 1;
            }
            LineKind::Added => {
                added.extend(line[1..].chars().filter(|c| !c.is_whitespace()));
                changes += 1;
            }
            _ => {}
        }
    }

    changes > 0 && removed == added
}

/// Replace a segment's body with a one-line placeholder, keeping the
/// file boundary header so the model still sees which file changed.
fn placeholder_segment(segment: &str, placeholder: &str) -> String {
    let header = segment.lines().next().unwrap_or_default();
    format!("{header}\n{placeholder}\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn options() -> PreprocessConfig {
        PreprocessConfig {
            fold_deletes_over: 3,
            max_context_lines: 4,
            elide_whitespace_only: true,
            compress_spaces: false,
        }
    }

    #[test]
    fn binary_segment_becomes_placeholder() {
        let diff = "diff --git a/logo.png b/logo.png\nindex 000..111\nBinary files a/logo.png and b/logo.png differ\n";
        let cleaned = clean_diff(diff, &options());
        assert!(cleaned.contains(BINARY_PLACEHOLDER));
        assert!(!cleaned.contains("Binary files"));
        assert!(cleaned.starts_with("diff --git a/logo.png"));
    }

    #[test]
    fn whitespace_only_segment_becomes_placeholder() {
        let diff = "diff --git a/f.rs b/f.rs\n--- a/f.rs\n+++ b/f.rs\n@@ -1,2 +1,2 @@\n-let x=1;\n+let x = 1;\n-let y=2;\n+let y  =  2;\n";
        let cleaned = clean_diff(diff, &options());
        assert!(cleaned.contains(WHITESPACE_PLACEHOLDER));
        assert!(!cleaned.contains("let x"));
    }

    #[test]
    fn whitespace_elision_can_be_disabled() {
        let diff = "diff --git a/f.rs b/f.rs\n--- a/f.rs\n+++ b/f.rs\n@@ -1,1 +1,1 @@\n-let x=1;\n+let x = 1;\n";
        let mut opts = options();
        opts.elide_whitespace_only = false;
        let cleaned = clean_diff(diff, &opts);
        assert!(cleaned.contains("+let x = 1;"));
    }

    #[test]
    fn real_change_not_elided() {
        let diff = "diff --git a/f.rs b/f.rs\n--- a/f.rs\n+++ b/f.rs\n@@ -1,1 +1,1 @@\n-let x = 1;\n+let x = 2;\n";
        let cleaned = clean_diff(diff, &options());
        assert!(cleaned.contains("+let x = 2;"));
        assert!(!cleaned.contains(WHITESPACE_PLACEHOLDER));
    }

    #[test]
    fn long_deletion_run_folds() {
        let mut diff = String::from("diff --git a/f.rs b/f.rs\n--- a/f.rs\n+++ b/f.rs\n@@ -1,6 +1,1 @@\n");
        for i in 0..6 {
            diff.push_str(&format!("-deleted line {i}\n"));
        }
        diff.push_str("+kept\n");
        let cleaned = clean_diff(&diff, &options());
        assert!(cleaned.contains("[... 6 lines deleted ...]"));
        assert!(!cleaned.contains("-deleted line 0"));
        assert!(cleaned.contains("+kept"));
    }

    #[test]
    fn short_deletion_run_kept() {
        let diff = "diff --git a/f.rs b/f.rs\n--- a/f.rs\n+++ b/f.rs\n@@ -1,2 +1,1 @@\n-gone a\n-gone b\n+here\n";
        let cleaned = clean_diff(diff, &options());
        assert!(cleaned.contains("-gone a"));
        assert!(cleaned.contains("-gone b"));
    }

    #[test]
    fn long_context_run_capped() {
        let mut diff = String::from("diff --git a/f.rs b/f.rs\n--- a/f.rs\n+++ b/f.rs\n@@ -1,8 +1,9 @@\n");
        for i in 0..8 {
            diff.push_str(&format!(" context {i}\n"));
        }
        diff.push_str("+added\n");
        let cleaned = clean_diff(&diff, &options());
        assert!(cleaned.contains(" context 3"));
        assert!(!cleaned.contains(" context 4"));
        assert!(cleaned.contains("[... 4 context lines elided ...]"));
        assert!(cleaned.contains("+added"));
    }

    #[test]
    fn added_lines_always_retained() {
        let mut diff = String::from("diff --git a/f.rs b/f.rs\n--- a/f.rs\n+++ b/f.rs\n@@ -1,0 +1,30 @@\n");
        for i in 0..30 {
            diff.push_str(&format!("+added {i}\n"));
        }
        let cleaned = clean_diff(&diff, &options());
        for i in 0..30 {
            assert!(cleaned.contains(&format!("+added {i}")), "missing added {i}");
        }
    }

    #[test]
    fn compress_spaces_preserves_indentation() {
        let line = "+    let x   =    1;";
        assert_eq!(compress_interior_spaces(line), "+    let x = 1;");
        // Context line with tab indentation
        assert_eq!(compress_interior_spaces(" \tfoo  bar"), " \tfoo bar");
        // Header-ish line without prefix
        assert_eq!(compress_interior_spaces("@@ -1,1  +1,1 @@"), "@@ -1,1 +1,1 @@");
    }

    #[test]
    fn compress_spaces_applies_to_content_lines() {
        let diff = "diff --git a/f.rs b/f.rs\n--- a/f.rs\n+++ b/f.rs\n@@ -1,1 +1,2 @@\n old   line\n+let x = 2;\n";
        let mut opts = options();
        opts.compress_spaces = true;
        opts.elide_whitespace_only = false;
        let cleaned = clean_diff(diff, &opts);
        assert!(cleaned.contains(" old line"));
    }

    #[test]
    fn multiple_segments_cleaned_independently() {
        let diff = "diff --git a/bin.png b/bin.png\nBinary files differ\ndiff --git a/f.rs b/f.rs\n--- a/f.rs\n+++ b/f.rs\n@@ -1,1 +1,1 @@\n-old\n+new code here\n";
        let cleaned = clean_diff(diff, &options());
        assert!(cleaned.contains(BINARY_PLACEHOLDER));
        assert!(cleaned.contains("+new code here"));
    }

    #[test]
    fn non_diff_input_passes_through() {
        let raw = "no markers here\n";
        assert_eq!(clean_diff(raw, &options()), raw);
    }
}
