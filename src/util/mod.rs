//! Shared utilities for `ignore_migrate`.
//!
//! Common functionality used across modules:
//! - Content hashing (SHA256) of source payloads
//! - Timestamp parsing and formatting (RFC3339)
//! - Progress indicators (for long-running phases)

mod hash;
pub mod progress;
pub mod time;

pub use hash::content_hash;
