//! Degradation manager: picks a review strategy from estimated token
//! load versus the model's context limit.
//!
//! Strategy selection is a pure function over precomputed estimates so
//! it can be tested without any model or network in the loop. The
//! chosen strategy is committed to; there is no backtracking once
//! chunked or diff-only execution starts.

use tracing::debug;

use crate::config::DegradationConfig;
use crate::diff::estimate_tokens;
use crate::models::request::ReviewContext;

/// Send everything below this fraction of the limit.
const FULL_SEND_FRACTION: f64 = 0.8;

/// Try context truncation up to this fraction of the limit.
const TRUNCATE_FRACTION: f64 = 1.2;

/// Estimated token load of one review, broken down by source.
#[derive(Debug, Clone, Copy)]
pub struct LoadEstimate {
    /// System prompt and request framing.
    pub prompt_tokens: usize,
    /// Cleaned diff text.
    pub diff_tokens: usize,
    /// Extra context files fetched alongside the diff.
    pub context_tokens: usize,
}

impl LoadEstimate {
    pub fn total(&self) -> usize {
        self.prompt_tokens + self.diff_tokens + self.context_tokens
    }
}

/// How the review should be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewStrategy {
    /// One call with the full diff and full context.
    Full,
    /// One call with each context file truncated to the line budget.
    TruncatedContext,
    /// Split the diff into chunks and review them in parallel.
    Chunked,
    /// One call with the diff and no extra context.
    DiffOnly,
}

/// Estimated load does not fit the model limit under any enabled
/// strategy.
#[derive(Debug, Clone, Copy)]
pub struct BudgetExceeded {
    pub estimated_tokens: usize,
    pub context_limit: usize,
}

/// Pick the first strategy, in fixed order, that fits the budget or is
/// unconditionally applicable.
///
/// `truncated_context_tokens` is the re-estimate after applying the
/// context line budget; it is only consulted in the truncation band.
pub fn select_strategy(
    estimate: LoadEstimate,
    truncated_context_tokens: usize,
    context_limit: usize,
    config: &DegradationConfig,
) -> Result<ReviewStrategy, BudgetExceeded> {
    let total = estimate.total();
    let limit = context_limit as f64;

    if (total as f64) <= FULL_SEND_FRACTION * limit {
        return Ok(ReviewStrategy::Full);
    }

    if (total as f64) <= TRUNCATE_FRACTION * limit {
        let truncated_total =
            estimate.prompt_tokens + estimate.diff_tokens + truncated_context_tokens;
        if truncated_total <= context_limit {
            debug!(total, truncated_total, "context truncation fits the budget");
            return Ok(ReviewStrategy::TruncatedContext);
        }
    }

    if config.file_chunking_enabled {
        return Ok(ReviewStrategy::Chunked);
    }
    if config.diff_only_fallback {
        return Ok(ReviewStrategy::DiffOnly);
    }

    Err(BudgetExceeded { estimated_tokens: total, context_limit })
}

/// Truncate every context file to at most `line_budget` lines, marking
/// the cut.
pub fn truncate_context(context: &ReviewContext, line_budget: usize) -> ReviewContext {
    let file_contents = context
        .file_contents
        .iter()
        .map(|(path, content)| {
            let lines: Vec<&str> = content.lines().collect();
            if lines.len() <= line_budget {
                (path.clone(), content.clone())
            } else {
                let mut truncated = lines[..line_budget].join("\n");
                truncated.push_str(&format!(
                    "\n[... truncated, {} more lines ...]\n",
                    lines.len() - line_budget
                ));
                (path.clone(), truncated)
            }
        })
        .collect();

    ReviewContext { file_contents }
}

/// Estimated token cost of a context (paths plus contents).
pub fn estimate_context_tokens(context: &ReviewContext) -> usize {
    context
        .file_contents
        .iter()
        .map(|(path, content)| estimate_tokens(path) + estimate_tokens(content))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn config() -> DegradationConfig {
        DegradationConfig {
            context_line_budget: 200,
            file_chunking_enabled: true,
            diff_only_fallback: true,
        }
    }

    fn estimate(prompt: usize, diff: usize, context: usize) -> LoadEstimate {
        LoadEstimate { prompt_tokens: prompt, diff_tokens: diff, context_tokens: context }
    }

    #[test]
    fn small_load_sends_full() {
        let plan = select_strategy(estimate(1_000, 5_000, 2_000), 2_000, 100_000, &config());
        assert_eq!(plan.unwrap(), ReviewStrategy::Full);
    }

    #[test]
    fn boundary_at_eighty_percent() {
        let plan = select_strategy(estimate(0, 80_000, 0), 0, 100_000, &config());
        assert_eq!(plan.unwrap(), ReviewStrategy::Full);
        let plan = select_strategy(estimate(0, 80_001, 0), 0, 100_000, &config());
        assert_ne!(plan.unwrap(), ReviewStrategy::Full);
    }

    #[test]
    fn truncation_band_uses_reestimate() {
        // 110% of limit, truncation brings it to 90%
        let plan = select_strategy(estimate(5_000, 55_000, 50_000), 30_000, 100_000, &config());
        assert_eq!(plan.unwrap(), ReviewStrategy::TruncatedContext);
    }

    #[test]
    fn truncation_falls_through_when_still_over() {
        let plan = select_strategy(estimate(5_000, 95_000, 10_000), 9_000, 100_000, &config());
        assert_eq!(plan.unwrap(), ReviewStrategy::Chunked);
    }

    #[test]
    fn heavy_load_chunks_without_trying_truncation() {
        // 150% of limit skips the truncation band entirely
        let plan = select_strategy(estimate(0, 150_000, 0), 0, 100_000, &config());
        assert_eq!(plan.unwrap(), ReviewStrategy::Chunked);
    }

    #[test]
    fn diff_only_when_chunking_disabled() {
        let mut cfg = config();
        cfg.file_chunking_enabled = false;
        let plan = select_strategy(estimate(0, 150_000, 20_000), 20_000, 100_000, &cfg);
        assert_eq!(plan.unwrap(), ReviewStrategy::DiffOnly);
    }

    #[test]
    fn no_strategy_fails_with_budget_error() {
        let cfg = DegradationConfig {
            context_line_budget: 200,
            file_chunking_enabled: false,
            diff_only_fallback: false,
        };
        let err = select_strategy(estimate(0, 150_000, 0), 0, 100_000, &cfg).unwrap_err();
        assert_eq!(err.estimated_tokens, 150_000);
        assert_eq!(err.context_limit, 100_000);
    }

    #[test]
    fn truncate_context_caps_lines() {
        let mut files = IndexMap::new();
        files.insert("big.rs".to_string(), (0..10).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n"));
        files.insert("small.rs".to_string(), "one\ntwo".to_string());
        let context = ReviewContext { file_contents: files };

        let truncated = truncate_context(&context, 4);
        let big = &truncated.file_contents["big.rs"];
        assert!(big.contains("line 3"));
        assert!(!big.contains("line 4"));
        assert!(big.contains("6 more lines"));
        assert_eq!(truncated.file_contents["small.rs"], "one\ntwo");
    }

    #[test]
    fn context_tokens_counts_paths_and_contents() {
        let mut files = IndexMap::new();
        files.insert("a.rs".to_string(), "x".repeat(40));
        let context = ReviewContext { file_contents: files };
        assert_eq!(estimate_context_tokens(&context), estimate_tokens("a.rs") + 10);
    }
}
