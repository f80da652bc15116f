//! Concrete tool-server transports.
//!
//! The endpoint scheme selects the transport: `http://` / `https://`
//! endpoints speak JSON over HTTP with bearer or custom-header
//! credential injection; anything else is treated as a command line for
//! a stdio subprocess speaking one JSON object per line.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::ServerConfig;

use super::{SessionFactory, ToolDescriptor, ToolError, ToolSession};

/// Per-request timeout applied by both transports.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default session factory: picks a transport from the endpoint scheme.
pub struct TransportFactory;

#[async_trait]
impl SessionFactory for TransportFactory {
    async fn connect(&self, server: &ServerConfig) -> Result<Arc<dyn ToolSession>, ToolError> {
        if server.endpoint.starts_with("http://") || server.endpoint.starts_with("https://") {
            Ok(Arc::new(HttpSession::connect(server)?))
        } else {
            Ok(Arc::new(StdioSession::spawn(server).await?))
        }
    }
}

/// Wire request shared by both transports.
#[derive(Serialize)]
struct WireRequest<'a> {
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

/// Wire response shared by both transports.
#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    id: u64,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// Extract the descriptor list from a `tools/list` result, applying the
/// server's allow-list (empty allow-list means all tools).
fn parse_tool_list(result: &Value, allowed: &[String]) -> Vec<ToolDescriptor> {
    result
        .get("tools")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|entry| {
                    let name = entry.get("name")?.as_str()?.to_string();
                    if !allowed.is_empty() && !allowed.contains(&name) {
                        return None;
                    }
                    let description = entry
                        .get("description")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    Some(ToolDescriptor { name, description })
                })
                .collect()
        })
        .unwrap_or_default()
}

// ── HTTP transport ──────────────────────────────────────────────────

/// HTTP session: every request is a JSON POST to the endpoint.
pub struct HttpSession {
    client: reqwest::Client,
    url: String,
    server_name: String,
    allowed_tools: Vec<String>,
    next_id: AtomicU64,
}

impl HttpSession {
    fn connect(server: &ServerConfig) -> Result<Self, ToolError> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(credential) = &server.credential {
            let (name, value) = match &server.credential_header {
                Some(header) => (header.clone(), credential.clone()),
                None => ("Authorization".to_string(), format!("Bearer {credential}")),
            };
            let name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| connect_err(&server.name, format!("bad credential header: {e}")))?;
            let mut value = reqwest::header::HeaderValue::from_str(&value)
                .map_err(|e| connect_err(&server.name, format!("bad credential value: {e}")))?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| connect_err(&server.name, e.to_string()))?;

        Ok(Self {
            client,
            url: server.endpoint.clone(),
            server_name: server.name.clone(),
            allowed_tools: server.allowed_tools.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ToolError> {
        let request = WireRequest {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        let response: WireResponse = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| connect_err(&self.server_name, e.to_string()))?
            .error_for_status()
            .map_err(|e| ToolError::Call(e.to_string()))?
            .json()
            .await
            .map_err(|e| ToolError::Call(format!("invalid response body: {e}")))?;

        if let Some(error) = response.error {
            return Err(ToolError::Call(error.to_string()));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl ToolSession for HttpSession {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        let result = self.request("tools/list", None).await?;
        Ok(parse_tool_list(&result, &self.allowed_tools))
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        self.request(
            "tools/call",
            Some(serde_json::json!({"name": name, "arguments": args})),
        )
        .await
    }
}

// ── Stdio transport ─────────────────────────────────────────────────

/// Stdio session: a spawned subprocess exchanging one JSON object per
/// line. Requests are serialized through a mutex so responses can be
/// matched to requests without an id routing table.
pub struct StdioSession {
    server_name: String,
    allowed_tools: Vec<String>,
    io: Mutex<StdioPipes>,
    // Held so the subprocess is killed when the session is dropped.
    _child: Child,
    next_id: AtomicU64,
}

struct StdioPipes {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl StdioSession {
    async fn spawn(server: &ServerConfig) -> Result<Self, ToolError> {
        let mut parts = server.endpoint.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| connect_err(&server.name, "empty stdio command".into()))?;

        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| connect_err(&server.name, format!("spawn failed: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| connect_err(&server.name, "no stdin pipe".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| connect_err(&server.name, "no stdout pipe".into()))?;

        debug!(server = %server.name, command = %server.endpoint, "stdio server spawned");

        Ok(Self {
            server_name: server.name.clone(),
            allowed_tools: server.allowed_tools.clone(),
            io: Mutex::new(StdioPipes { stdin, stdout: BufReader::new(stdout) }),
            _child: child,
            next_id: AtomicU64::new(1),
        })
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ToolError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = WireRequest { id, method, params };
        let mut line = serde_json::to_string(&request)
            .map_err(|e| ToolError::Call(format!("request encode failed: {e}")))?;
        line.push('\n');

        let exchange = async {
            let mut io = self.io.lock().await;
            io.stdin
                .write_all(line.as_bytes())
                .await
                .map_err(|e| connect_err(&self.server_name, format!("write failed: {e}")))?;
            io.stdin
                .flush()
                .await
                .map_err(|e| connect_err(&self.server_name, format!("flush failed: {e}")))?;

            let mut response_line = String::new();
            loop {
                response_line.clear();
                let n = io
                    .stdout
                    .read_line(&mut response_line)
                    .await
                    .map_err(|e| connect_err(&self.server_name, format!("read failed: {e}")))?;
                if n == 0 {
                    return Err(connect_err(&self.server_name, "server closed stdout".into()));
                }
                if let Ok(response) = serde_json::from_str::<WireResponse>(&response_line) {
                    // Skip unsolicited notifications until our id shows up
                    if response.id == id {
                        return Ok(response);
                    }
                }
            }
        };

        let response = tokio::time::timeout(REQUEST_TIMEOUT, exchange)
            .await
            .map_err(|_| ToolError::Call(format!("{method} timed out")))??;

        if let Some(error) = response.error {
            return Err(ToolError::Call(error.to_string()));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl ToolSession for StdioSession {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        let result = self.request("tools/list", None).await?;
        Ok(parse_tool_list(&result, &self.allowed_tools))
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        self.request(
            "tools/call",
            Some(serde_json::json!({"name": name, "arguments": args})),
        )
        .await
    }
}

fn connect_err(server: &str, message: String) -> ToolError {
    ToolError::Connect { server: server.to_string(), message }
}
