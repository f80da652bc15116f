//! Diff pipeline: unified diff parsing, preprocessing, and token-budget
//! chunk splitting.

pub mod parser;
pub mod preprocess;
pub mod splitter;

pub use parser::parse_unified_diff;
pub use preprocess::clean_diff;
pub use splitter::{estimate_tokens, split_into_chunks};
