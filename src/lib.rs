//! critiq - resilient automated pull request review core (library crate).
//!
//! Re-exports public modules for integration tests and external use.

pub mod config;
pub mod constants;
pub mod diff;
pub mod env;
pub mod llm;
pub mod mcp;
pub mod models;
pub mod review;
pub mod validate;
