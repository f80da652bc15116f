//! Shared types used across all modules.
//!
//! This module defines the core data structures for diffs, chunks,
//! review comments, and review requests. Other modules import from
//! here rather than reaching into each other's internals.

pub mod comment;
pub mod diff;
pub mod request;

pub use comment::{ChunkReviewResult, ReviewComment, ReviewResult, Severity};
pub use diff::{DiffChunk, FileDiff};
pub use request::{ReviewContext, ReviewRequest};
