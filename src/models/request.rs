//! Review request types.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::comment::ReviewComment;

/// A pull request review request handed to the core by the ingestion layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewRequest {
    /// Repository identifier (e.g. `owner/name`).
    pub repo: String,
    /// Pull request number.
    pub number: u64,
    /// Pull request title.
    pub title: String,
    /// Pull request description body.
    #[serde(default)]
    pub description: String,
    /// Author login.
    #[serde(default)]
    pub author: String,
    /// AI comments posted by previous runs, for cross-run dedup.
    #[serde(default)]
    pub prior_comments: Vec<ReviewComment>,
}

/// Extra context fetched alongside the diff before sending to the model.
#[derive(Debug, Clone, Default)]
pub struct ReviewContext {
    /// Full file contents for changed files (path → content, insertion-ordered).
    pub file_contents: IndexMap<String, String>,
}

impl ReviewContext {
    /// Total character length of all context files.
    pub fn total_chars(&self) -> usize {
        self.file_contents.values().map(|c| c.len()).sum()
    }
}
