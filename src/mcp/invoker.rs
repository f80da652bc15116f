//! Tool invoker: bounded retry around a single remote tool call.
//!
//! On failure the server is marked stale, a capped exponential backoff
//! is applied (interruptible by the caller's cancellation signal), and
//! the tool is re-resolved by name against the freshly acquired session
//! rather than reusing a stale handle. Retry state is local to each
//! invocation.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RetryConfig;

use super::connection::ConnectionManager;
use super::{ResponseFilter, ToolError};

/// Executes named tools against remote servers with retry and filtering.
pub struct ToolInvoker {
    manager: Arc<ConnectionManager>,
    retry: RetryConfig,
    /// Optional per-server response filters.
    filters: HashMap<String, Arc<dyn ResponseFilter>>,
}

impl ToolInvoker {
    pub fn new(manager: Arc<ConnectionManager>, retry: RetryConfig) -> Self {
        Self { manager, retry, filters: HashMap::new() }
    }

    /// Register a response filter for a server.
    pub fn with_filter(mut self, server: &str, filter: Arc<dyn ResponseFilter>) -> Self {
        self.filters.insert(server.to_string(), filter);
        self
    }

    /// Invoke `tool` on `server` with `args`.
    ///
    /// Runs up to the configured number of attempts. Circuit-open
    /// rejections and missing tools are surfaced immediately; transport
    /// and call failures mark the server stale and retry after backoff.
    /// Exhausting all attempts surfaces the last error tagged with the
    /// attempt count.
    pub async fn invoke(
        &self,
        server: &str,
        tool: &str,
        args: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, ToolError> {
        let mut last_err: Option<ToolError> = None;

        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                let backoff = self.retry.backoff(attempt - 1);
                debug!(server, tool, attempt, ?backoff, "retrying tool call");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ToolError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
            if cancel.is_cancelled() {
                return Err(ToolError::Cancelled);
            }

            let session = match self.manager.acquire(server).await {
                Ok(session) => session,
                // Fast-fail: the caller should not spin against an open breaker
                Err(err @ ToolError::CircuitOpen { .. }) => return Err(err),
                Err(err @ ToolError::UnknownServer(_)) => return Err(err),
                Err(err) => {
                    last_err = Some(err);
                    continue;
                }
            };

            // Re-resolve the tool against this session; after a reconnect
            // it may be a different tool instance.
            match session.list_tools().await {
                Ok(tools) => {
                    if !tools.iter().any(|t| t.name == tool) {
                        return Err(ToolError::ToolNotFound {
                            server: server.to_string(),
                            tool: tool.to_string(),
                        });
                    }
                }
                Err(err) => {
                    warn!(server, tool, error = %err, "tool enumeration failed");
                    self.manager.mark_stale(server);
                    last_err = Some(err);
                    continue;
                }
            }

            match session.call_tool(tool, args.clone()).await {
                Ok(value) => {
                    let value = match self.filters.get(server) {
                        Some(filter) => filter.filter(tool, value),
                        None => value,
                    };
                    return Ok(value);
                }
                Err(err) => {
                    warn!(server, tool, attempt, error = %err, "tool call failed");
                    self.manager.mark_stale(server);
                    last_err = Some(err);
                }
            }
        }

        Err(ToolError::Exhausted {
            attempts: self.retry.max_attempts,
            last: Box::new(last_err.unwrap_or_else(|| ToolError::Call("no attempts made".into()))),
        })
    }
}
