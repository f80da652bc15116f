//! Bounded-parallel chunk review and result aggregation.
//!
//! Each chunk runs as its own task behind a semaphore; one chunk's
//! failure never cancels its siblings. Aggregation follows chunk index
//! order, not completion order, so repeated runs produce the same
//! output for the same input.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::comment::{ChunkReviewResult, ReviewComment, ReviewResult};
use crate::models::diff::DiffChunk;

/// Length of the comment-text prefix used in dedup fingerprints.
const FINGERPRINT_PREFIX: usize = 50;

/// Review every chunk with at most `parallelism` in flight and merge
/// the partial results.
pub async fn review_chunked<F, Fut>(
    chunks: Vec<DiffChunk>,
    review_fn: F,
    parallelism: usize,
    cancel: &CancellationToken,
) -> ReviewResult
where
    F: Fn(DiffChunk) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ChunkReviewResult> + Send,
{
    let total = chunks.len();
    let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));
    let review_fn = Arc::new(review_fn);
    let mut set: JoinSet<ChunkReviewResult> = JoinSet::new();

    for chunk in chunks {
        let semaphore = Arc::clone(&semaphore);
        let review_fn = Arc::clone(&review_fn);
        let cancel = cancel.clone();
        let index = chunk.index;

        set.spawn(async move {
            let _permit = tokio::select! {
                _ = cancel.cancelled() => {
                    return ChunkReviewResult::failed(index, "review cancelled".into());
                }
                permit = semaphore.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return ChunkReviewResult::failed(index, "scheduler closed".into()),
                },
            };
            debug!(chunk = index + 1, total, "reviewing chunk");
            review_fn(chunk).await
        });
    }

    let mut results: Vec<ChunkReviewResult> = Vec::with_capacity(total);
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(err) => warn!(error = %err, "chunk review task panicked"),
        }
    }

    aggregate(results, total)
}

/// Merge per-chunk results into one review result.
pub fn aggregate(mut results: Vec<ChunkReviewResult>, total_chunks: usize) -> ReviewResult {
    results.sort_by_key(|r| r.chunk_index);

    let failed_chunks: Vec<usize> = results
        .iter()
        .filter(|r| r.error.is_some())
        .map(|r| r.chunk_index)
        .collect();
    let succeeded: Vec<&ChunkReviewResult> =
        results.iter().filter(|r| r.error.is_none()).collect();

    let comments = dedup_comments(
        succeeded
            .iter()
            .flat_map(|r| r.comments.iter().cloned())
            .collect(),
    );

    let score = if succeeded.is_empty() {
        0.0
    } else {
        succeeded.iter().map(|r| r.score).sum::<f64>() / succeeded.len() as f64
    };

    let summary = compose_summary(&succeeded, &failed_chunks, total_chunks);

    ReviewResult { comments, score, summary, failed_chunks }
}

/// Collapse exact duplicates by fingerprint, keeping first occurrence
/// order. Same-location comments with different text are all kept.
pub fn dedup_comments(comments: Vec<ReviewComment>) -> Vec<ReviewComment> {
    let mut seen: Vec<String> = Vec::new();
    let mut out: Vec<ReviewComment> = Vec::new();

    for comment in comments {
        let key = fingerprint(comment.file.as_deref(), &comment.comment);
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);
        out.push(comment);
    }
    out
}

/// Dedup fingerprint: lowercased file plus the first characters of the
/// whitespace-collapsed, lowercased comment text.
pub fn fingerprint(file: Option<&str>, comment: &str) -> String {
    let normalized: String = comment
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .chars()
        .take(FINGERPRINT_PREFIX)
        .collect();

    format!("{}:{normalized}", file.unwrap_or_default().to_lowercase())
}

/// One surviving summary is returned verbatim; anything else gets
/// per-chunk headers, a chunk count, and the list of failures.
fn compose_summary(
    succeeded: &[&ChunkReviewResult],
    failed: &[usize],
    total_chunks: usize,
) -> String {
    if succeeded.len() == 1 && failed.is_empty() {
        return succeeded[0].summary.clone();
    }

    let mut out = format!("Reviewed {total_chunks} chunks.\n");
    if !failed.is_empty() {
        let names: Vec<String> = failed.iter().map(|i| format!("chunk {}", i + 1)).collect();
        out.push_str(&format!("Failed: {}.\n", names.join(", ")));
    }
    for result in succeeded {
        if result.summary.is_empty() {
            continue;
        }
        out.push_str(&format!(
            "\n### Chunk {}/{total_chunks}\n{}\n",
            result.chunk_index + 1,
            result.summary
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::comment::Severity;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn comment(file: &str, line: u32, text: &str) -> ReviewComment {
        ReviewComment {
            file: Some(file.to_string()),
            line: Some(line),
            comment: text.to_string(),
            severity: Severity::Warning,
            marker: None,
            commit: None,
        }
    }

    fn chunk(index: usize, total: usize) -> DiffChunk {
        DiffChunk { files: Vec::new(), index, total, token_count: 0 }
    }

    fn ok_result(index: usize, comments: Vec<ReviewComment>, score: f64, summary: &str) -> ChunkReviewResult {
        ChunkReviewResult {
            chunk_index: index,
            comments,
            score,
            summary: summary.to_string(),
            error: None,
        }
    }

    #[test]
    fn aggregate_skips_failed_chunk_and_averages_survivors() {
        let results = vec![
            ok_result(0, vec![comment("a.rs", 1, "first")], 8.0, "chunk one fine"),
            ChunkReviewResult::failed(1, "model exploded".into()),
            ok_result(2, vec![comment("c.rs", 3, "third")], 6.0, "chunk three fine"),
        ];
        let merged = aggregate(results, 3);

        assert_eq!(merged.comments.len(), 2);
        assert_eq!(merged.failed_chunks, vec![1]);
        assert!((merged.score - 7.0).abs() < f64::EPSILON);
        assert!(merged.summary.contains("chunk 2"));
        assert!(merged.summary.contains("Reviewed 3 chunks"));
    }

    #[test]
    fn aggregate_orders_comments_by_chunk_index() {
        let results = vec![
            ok_result(2, vec![comment("c.rs", 3, "late")], 5.0, ""),
            ok_result(0, vec![comment("a.rs", 1, "early")], 5.0, ""),
        ];
        let merged = aggregate(results, 3);
        assert_eq!(merged.comments[0].comment, "early");
        assert_eq!(merged.comments[1].comment, "late");
    }

    #[test]
    fn lone_summary_returned_verbatim() {
        let results = vec![ok_result(0, Vec::new(), 9.0, "all good")];
        let merged = aggregate(results, 1);
        assert_eq!(merged.summary, "all good");
    }

    #[test]
    fn zero_successes_scores_zero() {
        let results = vec![
            ChunkReviewResult::failed(0, "boom".into()),
            ChunkReviewResult::failed(1, "boom".into()),
        ];
        let merged = aggregate(results, 2);
        assert_eq!(merged.score, 0.0);
        assert!(merged.comments.is_empty());
        assert_eq!(merged.failed_chunks, vec![0, 1]);
    }

    #[test]
    fn dedup_collapses_case_insensitive_prefix_matches() {
        let comments = vec![
            comment("a.rs", 1, "Avoid unwrap here"),
            comment("A.rs", 2, "avoid   UNWRAP here"),
            comment("a.rs", 1, "completely different remark"),
        ];
        let deduped = dedup_comments(comments);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].comment, "Avoid unwrap here");
        assert_eq!(deduped[1].comment, "completely different remark");
    }

    #[test]
    fn fingerprint_truncates_long_comments() {
        let long_a = format!("{} tail one", "x".repeat(60));
        let long_b = format!("{} tail two", "x".repeat(60));
        assert_eq!(fingerprint(Some("f.rs"), &long_a), fingerprint(Some("f.rs"), &long_b));
        assert_ne!(fingerprint(Some("f.rs"), "short a"), fingerprint(Some("f.rs"), "short b"));
    }

    #[tokio::test]
    async fn parallelism_is_bounded() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let chunks: Vec<_> = (0..6).map(|i| chunk(i, 6)).collect();

        let a = Arc::clone(&active);
        let p = Arc::clone(&peak);
        let result = review_chunked(
            chunks,
            move |chunk| {
                let active = Arc::clone(&a);
                let peak = Arc::clone(&p);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    ChunkReviewResult {
                        chunk_index: chunk.index,
                        comments: Vec::new(),
                        score: 5.0,
                        summary: format!("chunk {}", chunk.index),
                        error: None,
                    }
                }
            },
            2,
            &CancellationToken::new(),
        )
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(result.failed_chunks.is_empty());
    }

    #[tokio::test]
    async fn one_chunk_error_does_not_cancel_siblings() {
        let chunks: Vec<_> = (0..3).map(|i| chunk(i, 3)).collect();
        let result = review_chunked(
            chunks,
            |chunk| async move {
                if chunk.index == 1 {
                    ChunkReviewResult::failed(chunk.index, "transient".into())
                } else {
                    ChunkReviewResult {
                        chunk_index: chunk.index,
                        comments: vec![ReviewComment {
                            file: None,
                            line: None,
                            comment: format!("note {}", chunk.index),
                            severity: Severity::Info,
                            marker: None,
                            commit: None,
                        }],
                        score: 4.0,
                        summary: String::new(),
                        error: None,
                    }
                }
            },
            4,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(result.comments.len(), 2);
        assert_eq!(result.failed_chunks, vec![1]);
    }

    #[tokio::test]
    async fn cancellation_fails_undispatched_chunks() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let chunks: Vec<_> = (0..3).map(|i| chunk(i, 3)).collect();
        let result = review_chunked(
            chunks,
            |chunk| async move { ok_result_for(chunk.index) },
            2,
            &cancel,
        )
        .await;
        assert_eq!(result.failed_chunks.len(), 3);
        assert!(result.summary.contains("Failed"));
    }

    fn ok_result_for(index: usize) -> ChunkReviewResult {
        ChunkReviewResult {
            chunk_index: index,
            comments: Vec::new(),
            score: 5.0,
            summary: String::new(),
            error: None,
        }
    }
}
