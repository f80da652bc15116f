//! Pull request review orchestration.
//!
//! Fetches the diff and context through the tool layer, preprocesses
//! and budgets the diff against the model's context limit, runs the
//! review (whole or chunked), then validates, deduplicates, and stamps
//! the resulting comments.

pub mod chunked;
pub mod degrade;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::constants::COMMENT_MARKER;
use crate::diff::{clean_diff, estimate_tokens, parse_unified_diff, split_into_chunks};
use crate::llm::{
    ChatOptions, ChatProvider, LlmError, is_retryable, parse_review_response, retry_backoff,
    review_schema,
};
use crate::mcp::{ToolError, invoker::ToolInvoker};
use crate::models::comment::{ChunkReviewResult, ReviewComment, ReviewResult};
use crate::models::request::{ReviewContext, ReviewRequest};
use crate::validate::ValidityIndex;

use degrade::{LoadEstimate, ReviewStrategy};

/// Errors terminating a review.
///
/// Content-level issues (an invalid comment, one failed chunk) degrade
/// gracefully and never surface here.
#[derive(Error, Debug)]
pub enum ReviewError {
    #[error("tool call failed: {0}")]
    Tool(#[from] ToolError),

    #[error("model call failed: {0}")]
    Llm(#[from] LlmError),

    #[error(
        "estimated load of {estimated_tokens} tokens exceeds the model limit of \
         {context_limit} and no degradation strategy is enabled"
    )]
    TokenBudgetExceeded { estimated_tokens: usize, context_limit: usize },

    #[error("tool result for {tool} carried no usable text")]
    BadToolResult { tool: String },

    #[error("review cancelled")]
    Cancelled,
}

/// Where to fetch the diff and context from.
#[derive(Debug, Clone)]
pub struct ToolSource {
    /// Configured server name.
    pub server: String,
    /// Tool returning the PR's unified diff.
    pub diff_tool: String,
    /// Tool returning changed-file contents, if the server offers one.
    pub context_tool: Option<String>,
}

/// Reviews pull requests end to end.
pub struct Reviewer {
    invoker: Arc<ToolInvoker>,
    provider: Arc<dyn ChatProvider>,
    config: Config,
    source: ToolSource,
}

impl Reviewer {
    pub fn new(
        invoker: Arc<ToolInvoker>,
        provider: Arc<dyn ChatProvider>,
        config: Config,
        source: ToolSource,
    ) -> Self {
        Self { invoker, provider, config, source }
    }

    /// Review a pull request and return validated, deduplicated comments
    /// with an aggregate score and summary.
    pub async fn review_pull_request(
        &self,
        request: &ReviewRequest,
        cancel: &CancellationToken,
    ) -> Result<ReviewResult, ReviewError> {
        let raw_diff = self.fetch_diff(request, cancel).await?;
        let context = self.fetch_context(request, cancel).await?;

        // The validity index comes from the raw diff; preprocessing
        // inserts elision markers that would confuse line tracking.
        let index = ValidityIndex::build(&raw_diff);
        let diff = clean_diff(&raw_diff, &self.config.preprocess);

        let system_prompt = self.system_prompt();
        let estimate = LoadEstimate {
            prompt_tokens: estimate_tokens(&system_prompt)
                + estimate_tokens(&request.title)
                + estimate_tokens(&request.description),
            diff_tokens: estimate_tokens(&diff),
            context_tokens: degrade::estimate_context_tokens(&context),
        };
        let truncated =
            degrade::truncate_context(&context, self.config.degradation.context_line_budget);
        let strategy = degrade::select_strategy(
            estimate,
            degrade::estimate_context_tokens(&truncated),
            self.config.model.context_limit,
            &self.config.degradation,
        )
        .map_err(|e| ReviewError::TokenBudgetExceeded {
            estimated_tokens: e.estimated_tokens,
            context_limit: e.context_limit,
        })?;

        info!(
            repo = %request.repo,
            number = request.number,
            estimated_tokens = estimate.total(),
            ?strategy,
            "review strategy selected"
        );

        let result = match strategy {
            ReviewStrategy::Full => {
                self.review_single(request, &diff, &context, cancel).await?
            }
            ReviewStrategy::TruncatedContext => {
                self.review_single(request, &diff, &truncated, cancel).await?
            }
            ReviewStrategy::DiffOnly => {
                self.review_single(request, &diff, &ReviewContext::default(), cancel).await?
            }
            ReviewStrategy::Chunked => {
                self.review_in_chunks(request, &raw_diff, &context, cancel).await
            }
        };

        Ok(ReviewResult {
            comments: finalize_comments(result.comments, &index, &request.prior_comments),
            score: result.score.clamp(0.0, 100.0),
            summary: result.summary,
            failed_chunks: result.failed_chunks,
        })
    }

    /// Single model call covering the whole diff.
    async fn review_single(
        &self,
        request: &ReviewRequest,
        diff: &str,
        context: &ReviewContext,
        cancel: &CancellationToken,
    ) -> Result<ReviewResult, ReviewError> {
        let user = build_user_prompt(request, diff, context, None);
        let text = self.call_model(&self.system_prompt(), &user, cancel).await?;
        let payload = parse_review_response(&text)?;
        Ok(ReviewResult::single(payload.comments, payload.score, payload.summary))
    }

    /// Split the diff into chunks and review them in parallel.
    async fn review_in_chunks(
        &self,
        request: &ReviewRequest,
        raw_diff: &str,
        context: &ReviewContext,
        cancel: &CancellationToken,
    ) -> ReviewResult {
        let files = parse_unified_diff(raw_diff);
        let chunks = split_into_chunks(
            files,
            self.config.chunking.max_tokens_per_chunk,
            self.config.chunking.max_files_per_chunk,
        );
        info!(chunks = chunks.len(), "reviewing diff in chunks");

        let reviewer = ChunkContext {
            provider: Arc::clone(&self.provider),
            preprocess: self.config.preprocess.clone(),
            retry: self.config.retry.clone(),
            model: self.config.model.name.clone(),
            system_prompt: self.system_prompt(),
            request: request.clone(),
            context: context.clone(),
            cancel: cancel.clone(),
        };
        let reviewer = Arc::new(reviewer);

        chunked::review_chunked(
            chunks,
            move |chunk| {
                let reviewer = Arc::clone(&reviewer);
                async move { reviewer.review_chunk(chunk).await }
            },
            self.config.chunking.parallelism,
            cancel,
        )
        .await
    }

    /// Call the model with bounded retry on transient errors.
    async fn call_model(
        &self,
        system: &str,
        user: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ReviewError> {
        call_with_retry(
            self.provider.as_ref(),
            system,
            user,
            &ChatOptions {
                model: Some(self.config.model.name.clone()),
                temperature: None,
                response_schema: Some(review_schema()),
            },
            self.config.retry.max_attempts,
            Duration::from_millis(self.config.retry.initial_backoff_ms),
            Duration::from_millis(self.config.retry.max_backoff_ms),
            cancel,
        )
        .await
        .map_err(Into::into)
    }

    fn system_prompt(&self) -> String {
        SYSTEM_PROMPT.to_string()
    }

    /// Fetch the PR's unified diff through the tool layer.
    async fn fetch_diff(
        &self,
        request: &ReviewRequest,
        cancel: &CancellationToken,
    ) -> Result<String, ReviewError> {
        let result = self
            .invoker
            .invoke(
                &self.source.server,
                &self.source.diff_tool,
                json!({"repo": request.repo, "number": request.number}),
                cancel,
            )
            .await
            .map_err(|err| match err {
                ToolError::Cancelled => ReviewError::Cancelled,
                other => ReviewError::Tool(other),
            })?;
        extract_text(&result)
            .ok_or_else(|| ReviewError::BadToolResult { tool: self.source.diff_tool.clone() })
    }

    /// Fetch changed-file contents, when a context tool is configured.
    ///
    /// Context is best-effort: a failure degrades to a diff-only review
    /// rather than aborting.
    async fn fetch_context(
        &self,
        request: &ReviewRequest,
        cancel: &CancellationToken,
    ) -> Result<ReviewContext, ReviewError> {
        let Some(tool) = &self.source.context_tool else {
            return Ok(ReviewContext::default());
        };

        let result = self
            .invoker
            .invoke(
                &self.source.server,
                tool,
                json!({"repo": request.repo, "number": request.number}),
                cancel,
            )
            .await;

        match result {
            Ok(value) => Ok(extract_context(&value)),
            Err(ToolError::Cancelled) => Err(ReviewError::Cancelled),
            Err(err) => {
                warn!(error = %err, "context fetch failed, reviewing diff only");
                Ok(ReviewContext::default())
            }
        }
    }

}

/// Validate locations, dedup within the run and against prior comments,
/// and stamp the dedup marker.
fn finalize_comments(
    comments: Vec<ReviewComment>,
    index: &ValidityIndex,
    prior_comments: &[ReviewComment],
) -> Vec<ReviewComment> {
    let prior: HashSet<String> = prior_comments
        .iter()
        .map(|c| chunked::fingerprint(c.file.as_deref(), &c.comment))
        .collect();

    let mut kept = Vec::with_capacity(comments.len());
    for mut comment in chunked::dedup_comments(comments) {
        match (&comment.file, comment.line) {
            (Some(file), Some(line)) => {
                if !index.is_valid(file, line) {
                    debug!(reason = %index.reason(file, line), "dropping invalid comment");
                    continue;
                }
            }
            (Some(file), None) => {
                if !index.file_in_diff(file) {
                    debug!(file = %file, "dropping comment on file outside the diff");
                    continue;
                }
            }
            // General remarks carry no location and bypass validation
            (None, _) => {}
        }

        let key = chunked::fingerprint(comment.file.as_deref(), &comment.comment);
        if prior.contains(&key) {
            debug!("dropping comment already posted by a previous run");
            continue;
        }

        if comment.marker.is_none() {
            comment.marker = Some(COMMENT_MARKER.to_string());
        }
        kept.push(comment);
    }
    kept
}

/// Per-chunk review state shared with spawned chunk tasks.
struct ChunkContext {
    provider: Arc<dyn ChatProvider>,
    preprocess: crate::config::PreprocessConfig,
    retry: crate::config::RetryConfig,
    model: String,
    system_prompt: String,
    request: ReviewRequest,
    context: ReviewContext,
    cancel: CancellationToken,
}

impl ChunkContext {
    async fn review_chunk(&self, chunk: crate::models::diff::DiffChunk) -> ChunkReviewResult {
        let index = chunk.index;
        let cleaned = clean_diff(&chunk.render(), &self.preprocess);

        // Only the context files belonging to this chunk ride along.
        let paths: HashSet<&str> = chunk.paths().into_iter().collect();
        let context = ReviewContext {
            file_contents: self
                .context
                .file_contents
                .iter()
                .filter(|(path, _)| paths.contains(path.as_str()))
                .map(|(p, c)| (p.clone(), c.clone()))
                .collect(),
        };

        let user = build_user_prompt(
            &self.request,
            &cleaned,
            &context,
            Some((chunk.index + 1, chunk.total)),
        );
        let text = match call_with_retry(
            self.provider.as_ref(),
            &self.system_prompt,
            &user,
            &ChatOptions {
                model: Some(self.model.clone()),
                temperature: None,
                response_schema: Some(review_schema()),
            },
            self.retry.max_attempts,
            Duration::from_millis(self.retry.initial_backoff_ms),
            Duration::from_millis(self.retry.max_backoff_ms),
            &self.cancel,
        )
        .await
        {
            Ok(text) => text,
            Err(err) => return ChunkReviewResult::failed(index, err.to_string()),
        };

        match parse_review_response(&text) {
            Ok(payload) => ChunkReviewResult {
                chunk_index: index,
                comments: payload.comments,
                score: payload.score,
                summary: payload.summary,
                error: None,
            },
            Err(err) => ChunkReviewResult::failed(index, err.to_string()),
        }
    }
}

/// Chat call with capped exponential backoff on retryable errors.
#[allow(clippy::too_many_arguments)]
async fn call_with_retry(
    provider: &dyn ChatProvider,
    system: &str,
    user: &str,
    options: &ChatOptions,
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    cancel: &CancellationToken,
) -> Result<String, LlmError> {
    let messages = [
        crate::llm::ChatMessage::system(system),
        crate::llm::ChatMessage::user(user),
    ];

    let mut last_err: Option<LlmError> = None;
    for attempt in 0..max_attempts {
        if attempt > 0 {
            let backoff = retry_backoff(attempt - 1, initial_backoff, max_backoff);
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(LlmError::ApiError("cancelled".into()));
                }
                _ = tokio::time::sleep(backoff) => {}
            }
        }
        if cancel.is_cancelled() {
            return Err(LlmError::ApiError("cancelled".into()));
        }

        match provider.chat(&messages, options).await {
            Ok(text) => return Ok(text),
            Err(err) if is_retryable(&err) => {
                warn!(attempt, error = %err, "retryable model error");
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_err.unwrap_or_else(|| LlmError::ApiError("no attempts made".into())))
}

const SYSTEM_PROMPT: &str = "\
You are a meticulous code reviewer. Review the provided pull request diff \
and respond with a single JSON object of the form \
{\"comments\": [{\"file\": \"path\", \"line\": 123, \"severity\": \
\"info|warning|error\", \"comment\": \"...\"}], \"score\": 0-100, \
\"summary\": \"...\"}. Only comment on lines added by the diff. Omit \
\"file\" and \"line\" for remarks about the change as a whole.";

/// Assemble the user message for one review call.
fn build_user_prompt(
    request: &ReviewRequest,
    diff: &str,
    context: &ReviewContext,
    part: Option<(usize, usize)>,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Pull request: {}\n", request.title));
    if !request.description.is_empty() {
        out.push_str(&format!("\n{}\n", request.description));
    }
    if let Some((i, n)) = part {
        out.push_str(&format!("\nThis is part {i} of {n} of the diff.\n"));
    }
    out.push_str("\n## Diff\n```diff\n");
    out.push_str(diff);
    out.push_str("```\n");

    if !context.file_contents.is_empty() {
        out.push_str("\n## Changed file contents\n");
        for (path, content) in &context.file_contents {
            out.push_str(&format!("\n### {path}\n```\n{content}\n```\n"));
        }
    }
    out
}

/// Pull a text payload out of a tool result.
fn extract_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => ["diff", "content", "text"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str).map(str::to_string)),
        _ => None,
    }
}

/// Pull a path-to-content map out of a context tool result.
fn extract_context(value: &Value) -> ReviewContext {
    let entries = value
        .get("files")
        .and_then(Value::as_object)
        .or_else(|| value.as_object());

    let file_contents = entries
        .map(|map| {
            map.iter()
                .filter_map(|(path, content)| {
                    content.as_str().map(|c| (path.clone(), c.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    ReviewContext { file_contents }
}
