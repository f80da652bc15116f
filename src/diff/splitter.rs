//! Token estimation and token-budget chunk splitting.
//!
//! Splitting is greedy over files in input order, so the same diff and
//! limits always produce the same chunks. A single file that exceeds
//! the budget on its own is split at hunk boundaries (and within a
//! hunk at line boundaries) into several chunks sharing the same path.

use tracing::debug;

use crate::models::diff::{DiffChunk, DiffLine, FileDiff, Hunk};

/// Characters per estimated token.
const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token cost of a text.
///
/// Uses a flat chars-per-token ratio. Deliberately pessimistic for
/// dense code; the degradation thresholds absorb the slack.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Split file diffs into chunks of at most `max_tokens` estimated
/// tokens and `max_files` files each.
///
/// Files are never reordered. `index`/`total` are assigned in a second
/// pass once the chunk count is known.
pub fn split_into_chunks(
    files: Vec<FileDiff>,
    max_tokens: usize,
    max_files: usize,
) -> Vec<DiffChunk> {
    let max_files = max_files.max(1);
    let mut groups: Vec<Vec<FileDiff>> = Vec::new();
    let mut current: Vec<FileDiff> = Vec::new();
    let mut current_tokens = 0usize;

    for file in files {
        let cost = file.estimated_tokens();

        if cost > max_tokens {
            // Oversized file: close the open group, then give each
            // piece of the file its own chunk.
            if !current.is_empty() {
                groups.push(std::mem::take(&mut current));
                current_tokens = 0;
            }
            let pieces = split_oversized_file(file, max_tokens);
            debug!(pieces = pieces.len(), "split oversized file diff");
            for piece in pieces {
                groups.push(vec![piece]);
            }
            continue;
        }

        if !current.is_empty()
            && (current_tokens + cost > max_tokens || current.len() >= max_files)
        {
            groups.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current_tokens += cost;
        current.push(file);
    }
    if !current.is_empty() {
        groups.push(current);
    }

    let total = groups.len();
    groups
        .into_iter()
        .enumerate()
        .map(|(index, files)| {
            let token_count = files.iter().map(FileDiff::estimated_tokens).sum();
            DiffChunk { files, index, total, token_count }
        })
        .collect()
}

/// Split a single file diff that exceeds the budget into several file
/// diffs with the same path, each within the budget where possible.
fn split_oversized_file(file: FileDiff, max_tokens: usize) -> Vec<FileDiff> {
    let path_cost = estimate_tokens(file.path());
    let hunk_budget = max_tokens.saturating_sub(path_cost).max(1);

    let mut pieces: Vec<FileDiff> = Vec::new();
    let mut current: Vec<Hunk> = Vec::new();
    let mut current_tokens = 0usize;

    let template = FileDiff { hunks: Vec::new(), ..file.clone() };

    for hunk in file.hunks {
        let cost = hunk_tokens(&hunk);

        if cost > hunk_budget {
            if !current.is_empty() {
                pieces.push(FileDiff { hunks: std::mem::take(&mut current), ..template.clone() });
                current_tokens = 0;
            }
            for sub in split_oversized_hunk(hunk, hunk_budget) {
                pieces.push(FileDiff { hunks: vec![sub], ..template.clone() });
            }
            continue;
        }

        if !current.is_empty() && current_tokens + cost > hunk_budget {
            pieces.push(FileDiff { hunks: std::mem::take(&mut current), ..template.clone() });
            current_tokens = 0;
        }
        current_tokens += cost;
        current.push(hunk);
    }
    if !current.is_empty() {
        pieces.push(FileDiff { hunks: current, ..template });
    }

    pieces
}

/// Split a single hunk at line boundaries into sub-hunks with
/// recomputed ranges.
fn split_oversized_hunk(hunk: Hunk, budget: usize) -> Vec<Hunk> {
    let mut subs: Vec<Hunk> = Vec::new();
    let mut current: Vec<DiffLine> = Vec::new();
    let mut current_tokens = 0usize;

    let header = hunk.header.clone();
    let mut flush = |lines: &mut Vec<DiffLine>| {
        if !lines.is_empty() {
            subs.push(make_sub_hunk(std::mem::take(lines), header.clone()));
        }
    };

    for line in hunk.lines {
        // +1 for the prefix character
        let cost = estimate_tokens(&line.content) + 1;
        if !current.is_empty() && current_tokens + cost > budget {
            flush(&mut current);
            current_tokens = 0;
        }
        current_tokens += cost;
        current.push(line);
    }
    flush(&mut current);

    subs
}

/// Build a hunk around a line slice, deriving starts and counts from
/// the line numbers the parser assigned.
fn make_sub_hunk(lines: Vec<DiffLine>, header: Option<String>) -> Hunk {
    let old_start = lines.iter().find_map(|l| l.old_line_no).unwrap_or(0);
    let new_start = lines.iter().find_map(|l| l.new_line_no).unwrap_or(0);
    let old_count = lines.iter().filter(|l| l.old_line_no.is_some()).count() as u32;
    let new_count = lines.iter().filter(|l| l.new_line_no.is_some()).count() as u32;

    Hunk { old_start, old_count, new_start, new_count, header, lines }
}

fn hunk_tokens(hunk: &Hunk) -> usize {
    let header_cost = 10 + hunk.header.as_deref().map_or(0, estimate_tokens);
    header_cost
        + hunk
            .lines
            .iter()
            .map(|l| estimate_tokens(&l.content) + 1)
            .sum::<usize>()
}
