//! Fault-tolerant client for the remote tool-invocation protocol.
//!
//! The core fetches diffs and supporting files by invoking named tools
//! on configured remote servers. This module owns the full connection
//! lifecycle: per-server circuit breaking, coalesced reconnection, and
//! per-call retry with forced reconnect between attempts.

pub mod breaker;
pub mod connection;
pub mod invoker;
pub mod singleflight;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use breaker::CircuitBreaker;
pub use connection::ConnectionManager;
pub use invoker::ToolInvoker;
pub use singleflight::Singleflight;
pub use transport::TransportFactory;

/// Errors from the tool client.
///
/// `Clone` because a coalesced reconnect shares one result (success or
/// failure) with every waiter.
#[derive(Error, Debug, Clone)]
pub enum ToolError {
    /// No server with this name is configured.
    #[error("unknown tool server: {0}")]
    UnknownServer(String),

    /// The breaker for this server is open; no network attempt was made.
    #[error("circuit open for server {server}, retry in {retry_in:?}")]
    CircuitOpen { server: String, retry_in: Duration },

    /// Transport or session establishment failure.
    #[error("failed to connect to server {server}: {message}")]
    Connect { server: String, message: String },

    /// The named tool does not exist on the server (or is not allowed).
    #[error("tool {tool} not available on server {server}")]
    ToolNotFound { server: String, tool: String },

    /// The tool call itself failed.
    #[error("tool call failed: {0}")]
    Call(String),

    /// All retry attempts exhausted; carries the last underlying error.
    #[error("tool call failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<ToolError> },

    /// The caller's cancellation signal fired.
    #[error("tool call cancelled")]
    Cancelled,
}

/// A tool advertised by a remote server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolDescriptor {
    /// Tool name, unique per server.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
}

/// A live session against a remote tool server.
///
/// A session is replaced wholesale on reconnect; callers must re-resolve
/// tools by name against the new session rather than reuse old handles.
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Enumerate the tools this session exposes (allow-list applied).
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError>;

    /// Invoke a named tool with JSON arguments.
    async fn call_tool(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError>;
}

/// Creates sessions from server configuration.
///
/// Injected into the [`ConnectionManager`] so tests can supply in-memory
/// sessions without any transport.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(
        &self,
        server: &crate::config::ServerConfig,
    ) -> Result<Arc<dyn ToolSession>, ToolError>;
}

/// Per-server response post-processing applied after a successful call.
pub trait ResponseFilter: Send + Sync {
    fn filter(&self, tool: &str, value: serde_json::Value) -> serde_json::Value;
}

/// Default filter: drops configured fields and truncates long strings.
///
/// Tool servers sometimes return large payloads (full file bodies,
/// pagination metadata) that waste the model's context window.
pub struct TruncatingFilter {
    /// Top-level object fields to drop.
    pub drop_fields: Vec<String>,
    /// Maximum length for any string value; longer values are cut with
    /// an ellipsis marker.
    pub max_string_len: usize,
}

impl Default for TruncatingFilter {
    fn default() -> Self {
        Self { drop_fields: Vec::new(), max_string_len: 50_000 }
    }
}

impl ResponseFilter for TruncatingFilter {
    fn filter(&self, _tool: &str, mut value: serde_json::Value) -> serde_json::Value {
        if let Some(obj) = value.as_object_mut() {
            for field in &self.drop_fields {
                obj.remove(field);
            }
        }
        truncate_strings(&mut value, self.max_string_len);
        value
    }
}

/// Recursively truncate string values longer than `max_len`.
fn truncate_strings(value: &mut serde_json::Value, max_len: usize) {
    match value {
        serde_json::Value::String(s) => {
            if s.len() > max_len {
                let mut cut = max_len;
                while !s.is_char_boundary(cut) {
                    cut -= 1;
                }
                s.truncate(cut);
                s.push_str("…[truncated]");
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                truncate_strings(item, max_len);
            }
        }
        serde_json::Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                truncate_strings(v, max_len);
            }
        }
        _ => {}
    }
}
