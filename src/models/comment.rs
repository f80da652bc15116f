//! Review comment types produced by the model and returned to callers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity level of a review comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational suggestion.
    Info,
    /// Potential issue that should be addressed.
    Warning,
    /// Critical issue that must be fixed.
    Error,
}

impl Default for Severity {
    /// Comments arriving without a severity are treated as warnings.
    fn default() -> Self {
        Severity::Warning
    }
}

/// Custom deserializer for Severity that accepts common LLM variations.
///
/// LLMs sometimes return severity values like "Critical", "Major", "Minor",
/// "High", "Medium", "Low", "Note" instead of the expected "error",
/// "warning", "info". This normalizes them.
impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.to_lowercase().as_str() {
            "info" | "note" | "suggestion" | "low" | "minor" | "trivial" | "style"
                => Ok(Severity::Info),
            "warning" | "warn" | "medium" | "moderate" | "major"
                => Ok(Severity::Warning),
            "error" | "critical" | "high" | "severe" | "blocker" | "fatal"
                => Ok(Severity::Error),
            _ => {
                // Fall back to warning for unrecognised severities rather than failing
                Ok(Severity::Warning)
            }
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// A single comment proposed by the model for a pull request.
///
/// `file` and `line` are optional: a comment without a location is a
/// general remark on the whole change and bypasses line validation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReviewComment {
    /// Target file path relative to the repo root, if location-specific.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Target line number in the new file (1-based), if location-specific.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// The review comment text.
    pub comment: String,
    /// Severity, defaulted to warning when the model omits it.
    #[serde(default)]
    pub severity: Severity,
    /// Hidden marker stamped when posting, used for cross-run dedup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
    /// Commit the comment refers to, when the model reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

/// The outcome of reviewing a single chunk.
///
/// One per chunk execution; never mutated after creation, only read
/// during aggregation.
#[derive(Debug, Clone)]
pub struct ChunkReviewResult {
    /// Zero-based index of the chunk this result belongs to.
    pub chunk_index: usize,
    /// Comments proposed for this chunk (empty on error).
    pub comments: Vec<ReviewComment>,
    /// Numeric review score in `[0, 100]`.
    pub score: f64,
    /// Per-chunk summary text.
    pub summary: String,
    /// Error message if this chunk's review failed.
    pub error: Option<String>,
}

impl ChunkReviewResult {
    /// Result for a chunk whose review failed outright.
    pub fn failed(chunk_index: usize, error: String) -> Self {
        Self {
            chunk_index,
            comments: Vec::new(),
            score: 0.0,
            summary: String::new(),
            error: Some(error),
        }
    }
}

/// Final result of a pull request review.
#[derive(Debug, Clone)]
pub struct ReviewResult {
    /// Validated, deduplicated comments.
    pub comments: Vec<ReviewComment>,
    /// Aggregate score in `[0, 100]` (averaged over succeeded chunks).
    pub score: f64,
    /// Combined summary text.
    pub summary: String,
    /// Indexes of chunks that failed (empty for unchunked reviews).
    pub failed_chunks: Vec<usize>,
}

impl ReviewResult {
    /// Result of a single unchunked review call.
    pub fn single(comments: Vec<ReviewComment>, score: f64, summary: String) -> Self {
        Self { comments, score, summary, failed_chunks: Vec::new() }
    }
}
