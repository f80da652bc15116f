//! Integration test for the review pipeline.
//!
//! Drives `Reviewer::review_pull_request` end-to-end with a fake tool
//! server and a canned chat provider, without touching the network.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use critiq::config::{BreakerConfig, Config, ServerConfig};
use critiq::constants::COMMENT_MARKER;
use critiq::llm::{ChatMessage, ChatOptions, ChatProvider, LlmError};
use critiq::mcp::connection::ConnectionManager;
use critiq::mcp::invoker::ToolInvoker;
use critiq::mcp::{SessionFactory, ToolDescriptor, ToolError, ToolSession};
use critiq::models::comment::{ReviewComment, Severity};
use critiq::models::request::ReviewRequest;
use critiq::review::{ReviewError, Reviewer, ToolSource};

const DIFF: &str = "\
diff --git a/src/alpha.rs b/src/alpha.rs
index 111..222 100644
--- a/src/alpha.rs
+++ b/src/alpha.rs
@@ -1,2 +1,3 @@
 fn alpha() {
+    let added = 1;
 }
diff --git a/src/beta.rs b/src/beta.rs
index 333..444 100644
--- a/src/beta.rs
+++ b/src/beta.rs
@@ -10,2 +10,3 @@
 fn beta() {
+    let extra = 2;
 }
";

/// Tool server answering `fetch_diff` and `fetch_files` with fixtures.
struct FixtureSession;

#[async_trait]
impl ToolSession for FixtureSession {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        Ok(vec![
            ToolDescriptor { name: "fetch_diff".into(), description: String::new() },
            ToolDescriptor { name: "fetch_files".into(), description: String::new() },
        ])
    }

    async fn call_tool(&self, name: &str, _args: Value) -> Result<Value, ToolError> {
        match name {
            "fetch_diff" => Ok(json!({"diff": DIFF})),
            "fetch_files" => Ok(json!({"files": {
                "src/alpha.rs": "fn alpha() {\n    let added = 1;\n}\n",
                "src/beta.rs": "fn beta() {\n    let extra = 2;\n}\n",
            }})),
            other => Err(ToolError::Call(format!("unknown tool {other}"))),
        }
    }
}

struct FixtureFactory;

#[async_trait]
impl SessionFactory for FixtureFactory {
    async fn connect(&self, _server: &ServerConfig) -> Result<Arc<dyn ToolSession>, ToolError> {
        Ok(Arc::new(FixtureSession))
    }
}

/// Chat provider returning a canned review payload and counting calls.
struct CannedProvider {
    payload: String,
    calls: AtomicUsize,
    /// Whether any single call carried both fixture files' additions.
    saw_whole_diff: AtomicBool,
    /// Whether every call so far carried a response schema.
    always_got_schema: AtomicBool,
}

impl CannedProvider {
    fn new(payload: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            payload: payload.into(),
            calls: AtomicUsize::new(0),
            saw_whole_diff: AtomicBool::new(false),
            always_got_schema: AtomicBool::new(true),
        })
    }
}

#[async_trait]
impl ChatProvider for CannedProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if options.response_schema.is_none() {
            self.always_got_schema.store(false, Ordering::SeqCst);
        }
        if let Some(user) = messages.iter().find(|m| m.role == "user") {
            if user.content.contains("let added = 1") && user.content.contains("let extra = 2") {
                self.saw_whole_diff.store(true, Ordering::SeqCst);
            }
        }
        Ok(self.payload.clone())
    }
}

fn make_reviewer(provider: Arc<dyn ChatProvider>, config: Config) -> Reviewer {
    let servers = vec![ServerConfig {
        name: "forge".into(),
        endpoint: "stub".into(),
        ..Default::default()
    }];
    let manager = Arc::new(ConnectionManager::new(
        servers,
        Arc::new(FixtureFactory),
        BreakerConfig::default(),
    ));
    let invoker = Arc::new(ToolInvoker::new(manager, config.retry.clone()));
    Reviewer::new(
        invoker,
        provider,
        config,
        ToolSource {
            server: "forge".into(),
            diff_tool: "fetch_diff".into(),
            context_tool: Some("fetch_files".into()),
        },
    )
}

/// Opt-in log output for debugging: `RUST_LOG=debug cargo test`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn request() -> ReviewRequest {
    ReviewRequest {
        repo: "acme/widgets".into(),
        number: 7,
        title: "Add counters".into(),
        description: "Introduces two counters.".into(),
        author: "dev".into(),
        prior_comments: Vec::new(),
    }
}

#[tokio::test]
async fn full_review_validates_and_stamps_comments() {
    init_tracing();
    let payload = json!({
        "comments": [
            {"file": "src/alpha.rs", "line": 2, "severity": "warning",
             "comment": "Name the constant instead of a magic number."},
            {"file": "src/alpha.rs", "line": 1, "severity": "error",
             "comment": "This line was not changed by the diff."},
            {"file": "src/nowhere.rs", "line": 5,
             "comment": "File outside the diff."},
            {"comment": "Overall the change looks reasonable.", "severity": "info"}
        ],
        "score": 81.0,
        "summary": "Two small additions."
    });
    let provider = CannedProvider::new(payload.to_string());
    let reviewer = make_reviewer(provider.clone(), Config::default());

    let result = reviewer
        .review_pull_request(&request(), &CancellationToken::new())
        .await
        .unwrap();

    // Only the added-line comment and the general remark survive
    assert_eq!(result.comments.len(), 2);
    assert_eq!(result.comments[0].file.as_deref(), Some("src/alpha.rs"));
    assert_eq!(result.comments[0].line, Some(2));
    assert!(result.comments[1].file.is_none());
    for comment in &result.comments {
        assert_eq!(comment.marker.as_deref(), Some(COMMENT_MARKER));
    }
    assert_eq!(result.score, 81.0);
    assert_eq!(result.summary, "Two small additions.");
    assert!(result.failed_chunks.is_empty());
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    assert!(
        provider.always_got_schema.load(Ordering::SeqCst),
        "model call was missing the response schema"
    );
}

#[tokio::test]
async fn oversized_review_runs_chunked_never_full() {
    init_tracing();
    let payload = json!({
        "comments": [],
        "score": 70.0,
        "summary": "Partial look."
    });
    let provider = CannedProvider::new(payload.to_string());

    let mut config = Config::default();
    // Force the load far over the limit so chunking is selected
    config.model.context_limit = 50;
    config.chunking.max_tokens_per_chunk = 40;
    config.chunking.max_files_per_chunk = 1;

    let reviewer = make_reviewer(provider.clone(), config);
    let result = reviewer
        .review_pull_request(&request(), &CancellationToken::new())
        .await
        .unwrap();

    // One call per chunk, never a single full-diff call
    assert!(provider.calls.load(Ordering::SeqCst) >= 2);
    assert!(
        !provider.saw_whole_diff.load(Ordering::SeqCst),
        "a single call carried the whole diff"
    );
    assert!(result.failed_chunks.is_empty());
    assert!((result.score - 70.0).abs() < f64::EPSILON);
    assert!(
        provider.always_got_schema.load(Ordering::SeqCst),
        "a chunk call was missing the response schema"
    );
}

#[tokio::test]
async fn prior_comments_are_not_reposted() {
    init_tracing();
    let payload = json!({
        "comments": [
            {"file": "src/alpha.rs", "line": 2,
             "comment": "Name the constant instead of a magic number."}
        ],
        "score": 90.0,
        "summary": "Nothing new."
    });
    let provider = CannedProvider::new(payload.to_string());
    let reviewer = make_reviewer(provider, Config::default());

    let mut req = request();
    req.prior_comments = vec![ReviewComment {
        file: Some("src/alpha.rs".into()),
        line: Some(2),
        comment: "name the constant instead of a magic number.".into(),
        severity: Severity::Warning,
        marker: Some(COMMENT_MARKER.into()),
        commit: None,
    }];

    let result = reviewer
        .review_pull_request(&req, &CancellationToken::new())
        .await
        .unwrap();
    assert!(result.comments.is_empty());
}

#[tokio::test]
async fn no_strategy_surfaces_budget_error() {
    init_tracing();
    let provider = CannedProvider::new("{}");
    let mut config = Config::default();
    config.model.context_limit = 10;
    config.degradation.file_chunking_enabled = false;
    config.degradation.diff_only_fallback = false;

    let reviewer = make_reviewer(provider, config);
    let err = reviewer
        .review_pull_request(&request(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ReviewError::TokenBudgetExceeded { .. }));
}

#[tokio::test]
async fn cancelled_token_aborts_before_fetch() {
    init_tracing();
    let provider = CannedProvider::new("{}");
    let reviewer = make_reviewer(provider.clone(), Config::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = reviewer
        .review_pull_request(&request(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ReviewError::Cancelled));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
}
