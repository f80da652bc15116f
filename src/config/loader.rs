//! Config struct and loading logic.
//!
//! Priority (highest to lowest):
//! 1. Environment variables
//! 2. `.critiq.toml` in repo root
//! 3. `~/.config/critiq/config.toml` (global defaults)
//! 4. Built-in defaults

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::env::Env;

/// Errors during config loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseFile {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub servers: Vec<ServerConfig>,
    pub model: ModelConfig,
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
    pub chunking: ChunkingConfig,
    pub degradation: DegradationConfig,
    pub preprocess: PreprocessConfig,
}

/// A configured remote tool server.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Unique server name used in tool invocations.
    pub name: String,
    /// Endpoint: `http(s)://...` for HTTP transport, anything else is
    /// treated as a command line for a stdio subprocess.
    pub endpoint: String,
    /// Bearer token or custom-header credential.
    pub credential: Option<String>,
    /// Header name for the credential; `Authorization: Bearer` when unset.
    pub credential_header: Option<String>,
    /// Tools this server is allowed to expose; empty means all.
    pub allowed_tools: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            endpoint: String::new(),
            credential: None,
            credential_header: None,
            allowed_tools: Vec::new(),
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("credential", &self.credential.as_ref().map(|_| "[REDACTED]"))
            .field("credential_header", &self.credential_header)
            .field("allowed_tools", &self.allowed_tools)
            .finish()
    }
}

/// Language model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model identifier passed through to the chat capability.
    pub name: String,
    /// Context window limit in tokens.
    pub context_limit: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "claude-sonnet-4-20250514".to_string(),
            context_limit: 128_000,
        }
    }
}

/// Per-invocation retry configuration for tool calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts per tool invocation (first try included).
    pub max_attempts: u32,
    /// Initial backoff between attempts, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Backoff ceiling, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
        }
    }
}

impl RetryConfig {
    /// Compute the capped exponential backoff for a zero-based attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.initial_backoff_ms);
        let backoff = base.saturating_mul(2u32.saturating_pow(attempt));
        backoff.min(Duration::from_millis(self.max_backoff_ms))
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// How long the breaker stays open, in seconds.
    pub open_duration_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_duration_secs: 60,
        }
    }
}

impl BreakerConfig {
    /// The open duration as a `Duration`.
    pub fn open_duration(&self) -> Duration {
        Duration::from_secs(self.open_duration_secs)
    }
}

/// Chunk splitting and parallelism configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Token ceiling per chunk.
    pub max_tokens_per_chunk: usize,
    /// File-count ceiling per chunk.
    pub max_files_per_chunk: usize,
    /// Bounded parallelism for chunk reviews.
    pub parallelism: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_chunk: 24_000,
            max_files_per_chunk: 10,
            parallelism: 4,
        }
    }
}

/// Degradation strategy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradationConfig {
    /// Line budget per extra-context file under L1 truncation.
    pub context_line_budget: usize,
    /// Whether L2 file-chunked parallel review is enabled.
    pub file_chunking_enabled: bool,
    /// Whether L3 diff-only fallback is enabled.
    pub diff_only_fallback: bool,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            context_line_budget: 200,
            file_chunking_enabled: true,
            diff_only_fallback: true,
        }
    }
}

/// Diff preprocessing thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Fold runs of consecutive deletion lines longer than this.
    pub fold_deletes_over: usize,
    /// Cap on consecutive context lines before elision.
    pub max_context_lines: usize,
    /// Replace whitespace-only file changes with a placeholder.
    pub elide_whitespace_only: bool,
    /// Compress runs of interior spaces/tabs to a single space.
    pub compress_spaces: bool,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            fold_deletes_over: 10,
            max_context_lines: 20,
            elide_whitespace_only: true,
            compress_spaces: false,
        }
    }
}

impl Config {
    /// Load configuration with proper layering.
    ///
    /// Reads from global config, repo-local config, then applies
    /// environment variable overrides.
    pub fn load(repo_root: Option<&Path>, env: &Env) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // Layer 3: global config
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                config.merge(Self::load_file(&global_path)?);
            }
        }

        // Layer 2: repo-local config
        if let Some(root) = repo_root {
            let local_path = root.join(crate::constants::CONFIG_FILENAME);
            if local_path.exists() {
                config.merge(Self::load_file(&local_path)?);
            }
        }

        // Layer 1: environment variables
        config.apply_env_vars(env);

        Ok(config)
    }

    /// Load a config from a specific file.
    fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::ParseFile {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the global config file path.
    fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(crate::constants::CONFIG_DIR).join("config.toml"))
    }

    /// Merge another config into this one (other takes precedence for non-default values).
    fn merge(&mut self, other: Config) {
        // Servers are replaced wholesale when the other layer defines any
        if !other.servers.is_empty() {
            self.servers = other.servers;
        }

        let model_default = ModelConfig::default();
        if other.model.name != model_default.name {
            self.model.name = other.model.name;
        }
        if other.model.context_limit != model_default.context_limit {
            self.model.context_limit = other.model.context_limit;
        }

        let retry_default = RetryConfig::default();
        if other.retry.max_attempts != retry_default.max_attempts {
            self.retry.max_attempts = other.retry.max_attempts;
        }
        if other.retry.initial_backoff_ms != retry_default.initial_backoff_ms {
            self.retry.initial_backoff_ms = other.retry.initial_backoff_ms;
        }
        if other.retry.max_backoff_ms != retry_default.max_backoff_ms {
            self.retry.max_backoff_ms = other.retry.max_backoff_ms;
        }

        let breaker_default = BreakerConfig::default();
        if other.breaker.failure_threshold != breaker_default.failure_threshold {
            self.breaker.failure_threshold = other.breaker.failure_threshold;
        }
        if other.breaker.open_duration_secs != breaker_default.open_duration_secs {
            self.breaker.open_duration_secs = other.breaker.open_duration_secs;
        }

        let chunking_default = ChunkingConfig::default();
        if other.chunking.max_tokens_per_chunk != chunking_default.max_tokens_per_chunk {
            self.chunking.max_tokens_per_chunk = other.chunking.max_tokens_per_chunk;
        }
        if other.chunking.max_files_per_chunk != chunking_default.max_files_per_chunk {
            self.chunking.max_files_per_chunk = other.chunking.max_files_per_chunk;
        }
        if other.chunking.parallelism != chunking_default.parallelism {
            self.chunking.parallelism = other.chunking.parallelism;
        }

        let degradation_default = DegradationConfig::default();
        if other.degradation.context_line_budget != degradation_default.context_line_budget {
            self.degradation.context_line_budget = other.degradation.context_line_budget;
        }
        // Disabled overrides enabled for the fallback flags
        if !other.degradation.file_chunking_enabled {
            self.degradation.file_chunking_enabled = false;
        }
        if !other.degradation.diff_only_fallback {
            self.degradation.diff_only_fallback = false;
        }

        let preprocess_default = PreprocessConfig::default();
        if other.preprocess.fold_deletes_over != preprocess_default.fold_deletes_over {
            self.preprocess.fold_deletes_over = other.preprocess.fold_deletes_over;
        }
        if other.preprocess.max_context_lines != preprocess_default.max_context_lines {
            self.preprocess.max_context_lines = other.preprocess.max_context_lines;
        }
        if !other.preprocess.elide_whitespace_only {
            self.preprocess.elide_whitespace_only = false;
        }
        if other.preprocess.compress_spaces {
            self.preprocess.compress_spaces = true;
        }
    }

    /// Apply environment variable overrides.
    fn apply_env_vars(&mut self, env: &Env) {
        if let Ok(val) = env.var(crate::constants::ENV_MODEL) {
            self.model.name = val;
        }
        if let Some(val) = env.var_parsed(crate::constants::ENV_CONTEXT_LIMIT) {
            self.model.context_limit = val;
        }
        if let Some(val) = env.var_parsed(crate::constants::ENV_CHUNK_PARALLELISM) {
            self.chunking.parallelism = val;
        }
    }
}
