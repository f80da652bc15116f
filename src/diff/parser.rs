//! Unified diff format parser.
//!
//! Parses `git diff` output (unified format) into `Vec<FileDiff>`. The
//! parsed form drives the token-budget splitter and the comment
//! validator, which relies on the per-line new-file numbering computed
//! here.

use crate::models::diff::{DiffLine, DiffLineType, FileDiff, Hunk};

/// Parse a unified diff string into a list of file diffs.
///
/// A string with no `diff --git` markers yields an empty list; callers
/// treat that as a parse failure where it matters (the validator
/// degrades to an empty index).
pub fn parse_unified_diff(input: &str) -> Vec<FileDiff> {
    let mut files: Vec<FileDiff> = Vec::new();
    let mut lines = input.lines().peekable();

    while let Some(line) = lines.next() {
        if !line.starts_with("diff --git ") {
            continue;
        }

        let (old_path, new_path) = parse_diff_header(line);
        let mut file = FileDiff {
            old_path,
            new_path,
            is_new: false,
            is_deleted: false,
            is_rename: false,
            is_binary: false,
            hunks: Vec::new(),
        };

        // Extended headers and hunks until the next file boundary
        while let Some(&next) = lines.peek() {
            if next.starts_with("diff --git ") {
                break;
            }
            if next.starts_with("@@") {
                if let Some(hunk) = parse_hunk(&mut lines) {
                    file.hunks.push(hunk);
                }
                continue;
            }
            if next.starts_with("new file mode") {
                file.is_new = true;
            } else if next.starts_with("deleted file mode") {
                file.is_deleted = true;
            } else if next.starts_with("rename from") || next.starts_with("rename to") {
                file.is_rename = true;
            } else if next.contains("Binary files") || next.starts_with("GIT binary patch") {
                file.is_binary = true;
            }
            // index/similarity/---/+++ and anything unrecognised: skip
            lines.next();
        }

        files.push(file);
    }

    files
}

/// Parse the `diff --git a/path b/path` header line into (old, new) paths.
///
/// Paths may contain spaces, so we scan for the second ` X/` prefix
/// separator instead of splitting on whitespace. `X` is any of git's
/// single-letter prefixes: `a`/`b` by default, `c`/`w`/`i`/`o` when
/// `diff.mnemonicPrefix` is enabled.
fn parse_diff_header(line: &str) -> (String, String) {
    let rest = line.strip_prefix("diff --git ").unwrap_or(line);

    let bytes = rest.as_bytes();
    let split_at = (1..bytes.len().saturating_sub(1)).find(|&i| {
        bytes[i] == b' '
            && bytes.get(i + 2) == Some(&b'/')
            && matches!(bytes.get(i + 1), Some(b'a' | b'b' | b'c' | b'w' | b'i' | b'o'))
    });

    match split_at {
        Some(i) => (
            strip_diff_prefix(&rest[..i]).to_string(),
            strip_diff_prefix(&rest[i + 1..]).to_string(),
        ),
        None => {
            // Fallback for prefix-less diffs (--no-prefix): split on space
            let mut parts = rest.splitn(2, ' ');
            let old = parts.next().unwrap_or_default();
            let new = parts.next().unwrap_or(old);
            (
                strip_diff_prefix(old).to_string(),
                strip_diff_prefix(new).to_string(),
            )
        }
    }
}

/// Strip a single-character git diff prefix (`a/`, `b/`, `c/`, `w/`, `i/`, `o/`).
pub(crate) fn strip_diff_prefix(path: &str) -> &str {
    let bytes = path.as_bytes();
    if bytes.len() >= 2
        && bytes[1] == b'/'
        && matches!(bytes[0], b'a' | b'b' | b'c' | b'w' | b'i' | b'o')
    {
        &path[2..]
    } else {
        path
    }
}

/// Parse a single hunk starting at its @@ line.
///
/// Added lines carry only a new-file number, removed lines only an
/// old-file number; context lines carry both. The counters are seeded
/// from the hunk header and advance exactly as the validator needs.
fn parse_hunk(lines: &mut std::iter::Peekable<std::str::Lines<'_>>) -> Option<Hunk> {
    let header_line = lines.next()?;
    let (old_start, old_count, new_start, new_count, header) = parse_hunk_header(header_line)?;

    let mut hunk_lines: Vec<DiffLine> = Vec::new();
    let mut old_line = old_start;
    let mut new_line = new_start;

    while let Some(&next) = lines.peek() {
        if next.starts_with("diff --git ") || next.starts_with("@@") {
            break;
        }

        let line = lines.next()?;

        if let Some(content) = line.strip_prefix('+') {
            hunk_lines.push(DiffLine {
                line_type: DiffLineType::Added,
                content: content.to_string(),
                old_line_no: None,
                new_line_no: Some(new_line),
            });
            new_line += 1;
        } else if let Some(content) = line.strip_prefix('-') {
            hunk_lines.push(DiffLine {
                line_type: DiffLineType::Removed,
                content: content.to_string(),
                old_line_no: Some(old_line),
                new_line_no: None,
            });
            old_line += 1;
        } else if line.starts_with(' ') || line.is_empty() {
            hunk_lines.push(DiffLine {
                line_type: DiffLineType::Context,
                content: line.get(1..).unwrap_or("").to_string(),
                old_line_no: Some(old_line),
                new_line_no: Some(new_line),
            });
            old_line += 1;
            new_line += 1;
        } else if line.starts_with('\\') {
            // "\ No newline at end of file"
            continue;
        } else {
            break;
        }
    }

    Some(Hunk {
        old_start,
        old_count,
        new_start,
        new_count,
        header,
        lines: hunk_lines,
    })
}

/// Parse a `@@ -old_start,old_count +new_start,new_count @@ header` line.
fn parse_hunk_header(line: &str) -> Option<(u32, u32, u32, u32, Option<String>)> {
    let line = line.strip_prefix("@@ ")?;
    let end = line.find(" @@")?;

    let header = match line[end + 3..].trim() {
        "" => None,
        rest => Some(rest.to_string()),
    };

    let mut ranges = line[..end].split(' ');
    let (old_start, old_count) = parse_range(ranges.next()?.strip_prefix('-')?)?;
    let (new_start, new_count) = parse_range(ranges.next()?.strip_prefix('+')?)?;
    if ranges.next().is_some() {
        return None;
    }

    Some((old_start, old_count, new_start, new_count, header))
}

/// Parse "start,count" or "start" (count defaults to 1).
fn parse_range(s: &str) -> Option<(u32, u32)> {
    match s.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((s.parse().ok()?, 1)),
    }
}
