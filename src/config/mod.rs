//! Configuration loading and layering.
//!
//! Handles `.critiq.toml` loading, environment variable resolution,
//! and merging with proper priority ordering.

pub mod loader;

pub use loader::{
    BreakerConfig, ChunkingConfig, Config, ConfigError, DegradationConfig, ModelConfig,
    PreprocessConfig, RetryConfig, ServerConfig,
};
