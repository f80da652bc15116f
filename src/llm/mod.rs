//! Language model capability and response parsing.
//!
//! The core never talks to a model vendor directly. It depends on the
//! [`ChatProvider`] trait, implemented elsewhere, and only knows how to
//! classify errors as retryable, compute backoff, and parse the JSON
//! review payload out of whatever text the model returned.

use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use thiserror::Error;

use crate::models::comment::ReviewComment;

/// Maximum length of model response text to include in parse error messages.
const PARSE_ERROR_PREVIEW_LEN: usize = 2000;

/// Errors from the chat capability.
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    /// Transport or API failure. May be transient.
    #[error("chat API error: {0}")]
    ApiError(String),

    /// The model's output could not be parsed. Never retried.
    #[error("failed to parse model response: {0}")]
    ParseError(String),

    /// The capability is missing required configuration.
    #[error("chat provider not configured: {0}")]
    NotConfigured(String),
}

/// A single message in a chat exchange.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    /// `"system"`, `"user"`, or `"assistant"`.
    pub role: String,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }
}

/// Options applied to a chat completion call.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Model identifier; the provider's default when `None`.
    pub model: Option<String>,
    /// Sampling temperature; provider default when `None`.
    pub temperature: Option<f64>,
    /// JSON schema the response should conform to, for providers that
    /// support structured output. Ignored by providers that do not.
    pub response_schema: Option<serde_json::Value>,
}

/// Abstract language-model capability the core depends on.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Run a multi-message chat completion and return the raw text.
    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions)
        -> Result<String, LlmError>;

    /// Convenience single-turn query with a system prompt.
    async fn simple_query(&self, system: &str, user: &str) -> Result<String, LlmError> {
        self.chat(
            &[ChatMessage::system(system), ChatMessage::user(user)],
            &ChatOptions::default(),
        )
        .await
    }
}

/// Check whether a chat error is transient and worth retrying.
///
/// Parse errors are never retried: the model is likely to produce the
/// same malformed output on a retry (especially truncated responses).
pub fn is_retryable(err: &LlmError) -> bool {
    match err {
        LlmError::ParseError(_) | LlmError::NotConfigured(_) => false,
        _ => classify_error(err).is_some(),
    }
}

/// Classifies a chat error into a short, user-friendly message.
///
/// Returns `Some(message)` for transient/retryable errors, `None` otherwise.
/// Matches HTTP status codes commonly used for rate limiting and temporary
/// unavailability: 429 (Too Many Requests), 503 (Service Unavailable),
/// 529 (Overloaded), and connection/timeout errors.
pub fn classify_error(err: &LlmError) -> Option<&'static str> {
    match err {
        LlmError::ApiError(msg) => {
            let msg_lower = msg.to_lowercase();
            if msg_lower.contains("429")
                || msg_lower.contains("rate limit")
                || msg_lower.contains("too many requests")
            {
                Some("Rate limited by API")
            } else if msg_lower.contains("503")
                || msg_lower.contains("service unavailable")
                || msg_lower.contains("high demand")
            {
                Some("High model load")
            } else if msg_lower.contains("529") || msg_lower.contains("overloaded") {
                Some("API overloaded")
            } else if msg_lower.contains("502") {
                Some("API gateway error")
            } else if msg_lower.contains("timeout") || msg_lower.contains("timed out") {
                Some("Request timed out")
            } else if msg_lower.contains("connection") {
                Some("Connection error")
            } else if msg_lower.contains("temporarily") || msg_lower.contains("try again") {
                Some("Temporary API error")
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Compute the backoff duration for a retry attempt using exponential backoff.
pub fn retry_backoff(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let backoff = initial.saturating_mul(2u32.saturating_pow(attempt));
    backoff.min(max)
}

/// The structured payload expected from a review completion.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ReviewPayload {
    #[serde(default)]
    pub comments: Vec<ReviewComment>,
    /// Numeric score in `[0, 100]`; 0 when the model omits it.
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub summary: String,
}

/// JSON schema for [`ReviewPayload`], handed to providers via
/// [`ChatOptions::response_schema`].
pub fn review_schema() -> serde_json::Value {
    schemars::schema_for!(ReviewPayload).to_value()
}

/// Parse the model response text into a structured review payload.
///
/// Accepts either a `{"comments": [...], "score": ..., "summary": ...}`
/// object or a bare JSON array of comments. Some providers wrap JSON in
/// markdown code fences (e.g. ```json ... ```), so we try the fenced
/// content as well.
pub fn parse_review_response(response: &str) -> Result<ReviewPayload, LlmError> {
    let trimmed = response.trim();

    if trimmed.is_empty() {
        return Ok(ReviewPayload { comments: Vec::new(), score: 0.0, summary: String::new() });
    }

    for candidate in extract_json_candidates(trimmed) {
        // Try parsing as the full payload object
        if let Ok(payload) = serde_json::from_str::<ReviewPayload>(&candidate) {
            return Ok(payload);
        }

        // Try parsing as a direct array of comments
        if let Ok(comments) = serde_json::from_str::<Vec<ReviewComment>>(&candidate) {
            return Ok(ReviewPayload { comments, score: 0.0, summary: String::new() });
        }
    }

    Err(LlmError::ParseError(format!(
        "could not parse model response as review JSON. Response: {}",
        preview(response)
    )))
}

/// Cut the response for the error message, stepping back to a char
/// boundary so multi-byte content never panics the slice.
fn preview(response: &str) -> &str {
    if response.len() <= PARSE_ERROR_PREVIEW_LEN {
        return response;
    }
    let mut cut = PARSE_ERROR_PREVIEW_LEN;
    while !response.is_char_boundary(cut) {
        cut -= 1;
    }
    &response[..cut]
}

/// Regex for extracting content inside markdown code fences.
///
/// The closing ``` must appear at the start of a line (`\n````) to avoid
/// matching triple-backticks embedded inside JSON string values.
static FENCE_RE: std::sync::LazyLock<regex::Regex> =
    std::sync::LazyLock::new(|| regex::Regex::new(r"(?s)```(?:json)?\s*\n(.*?)\n```").unwrap());

/// Extract candidate JSON strings from a response.
///
/// Returns the trimmed response itself, a brace/bracket slice, plus any
/// content inside markdown code fences (```json ... ``` or ``` ... ```).
fn extract_json_candidates(text: &str) -> Vec<String> {
    let mut candidates = Vec::new();

    // First candidate: the raw text
    candidates.push(text.to_string());

    // Second: outermost object or array slice. This is the most robust
    // strategy when the response contains nested code fences inside
    // JSON string values.
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (text.find(open), text.rfind(close)) {
            if start < end {
                candidates.push(text[start..=end].to_string());
            }
        }
    }

    // Third: extract content from markdown code fences.
    for cap in FENCE_RE.captures_iter(text) {
        if let Some(inner) = cap.get(1) {
            let inner_trimmed = inner.as_str().trim();
            if !inner_trimmed.is_empty() {
                candidates.push(inner_trimmed.to_string());
            }
        }
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_payload_object() {
        let response = r#"{
            "comments": [
                {"file": "src/main.rs", "line": 42, "severity": "error", "comment": "Bug found"}
            ],
            "score": 72.5,
            "summary": "One bug."
        }"#;
        let payload = parse_review_response(response).unwrap();
        assert_eq!(payload.comments.len(), 1);
        assert_eq!(payload.comments[0].file.as_deref(), Some("src/main.rs"));
        assert_eq!(payload.score, 72.5);
        assert_eq!(payload.summary, "One bug.");
    }

    #[test]
    fn parse_bare_comment_array() {
        let response = r#"[{"file": "a.rs", "line": 1, "comment": "check"}]"#;
        let payload = parse_review_response(response).unwrap();
        assert_eq!(payload.comments.len(), 1);
        assert_eq!(payload.score, 0.0);
    }

    #[test]
    fn parse_fenced_json() {
        let response = "Here is my review:\n```json\n{\"comments\": [], \"score\": 90, \"summary\": \"Clean.\"}\n```\nDone.";
        let payload = parse_review_response(response).unwrap();
        assert!(payload.comments.is_empty());
        assert_eq!(payload.score, 90.0);
    }

    #[test]
    fn parse_empty_response() {
        let payload = parse_review_response("   ").unwrap();
        assert!(payload.comments.is_empty());
        assert!(payload.summary.is_empty());
    }

    #[test]
    fn parse_garbage_fails() {
        let err = parse_review_response("I could not review this.").unwrap_err();
        assert!(matches!(err, LlmError::ParseError(_)));
    }

    #[test]
    fn parse_long_non_ascii_garbage_fails_without_panic() {
        // 2100 bytes of 3-byte chars, so the preview cut lands mid-char
        let response = "✓".repeat(700);
        let err = parse_review_response(&response).unwrap_err();
        assert!(matches!(err, LlmError::ParseError(_)));
    }

    #[test]
    fn rate_limit_is_retryable() {
        let err = LlmError::ApiError("HTTP 429 Too Many Requests".into());
        assert!(is_retryable(&err));
        assert_eq!(classify_error(&err), Some("Rate limited by API"));
    }

    #[test]
    fn overload_is_retryable() {
        let err = LlmError::ApiError("status 529: overloaded".into());
        assert!(is_retryable(&err));
    }

    #[test]
    fn parse_error_not_retryable() {
        let err = LlmError::ParseError("bad json".into());
        assert!(!is_retryable(&err));
    }

    #[test]
    fn permanent_api_error_not_retryable() {
        let err = LlmError::ApiError("HTTP 401 Unauthorized".into());
        assert!(!is_retryable(&err));
    }

    #[test]
    fn review_schema_names_payload_fields() {
        let schema = review_schema();
        let props = schema["properties"].as_object().unwrap();
        assert!(props.contains_key("comments"));
        assert!(props.contains_key("score"));
        assert!(props.contains_key("summary"));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let initial = Duration::from_millis(100);
        let max = Duration::from_millis(500);
        assert_eq!(retry_backoff(0, initial, max), Duration::from_millis(100));
        assert_eq!(retry_backoff(1, initial, max), Duration::from_millis(200));
        assert_eq!(retry_backoff(5, initial, max), Duration::from_millis(500));
    }
}
