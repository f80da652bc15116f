//! App-wide constants.
//!
//! Centralises the tool name, config paths, and environment variable
//! names so a rename only requires changing this file.

/// Display name of the tool (lowercase).
pub const APP_NAME: &str = "critiq";

/// Local config filename (e.g. `.critiq.toml` in repo root).
pub const CONFIG_FILENAME: &str = ".critiq.toml";

/// Directory name under `~/.config/` for global config.
pub const CONFIG_DIR: &str = "critiq";

/// Hidden marker stamped into posted comments for cross-run dedup.
pub const COMMENT_MARKER: &str = "<!-- critiq-review -->";

// ── Environment variable names ──────────────────────────────────────

pub const ENV_MODEL: &str = "CRITIQ_MODEL";
pub const ENV_CONTEXT_LIMIT: &str = "CRITIQ_CONTEXT_LIMIT";
pub const ENV_CHUNK_PARALLELISM: &str = "CRITIQ_CHUNK_PARALLELISM";
