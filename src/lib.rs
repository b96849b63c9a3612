//! `ignore_migrate`: resumable, reversible migration of legacy ignores into
//! target-system policies.
//!
//! Remote state is gathered into a local SQLite ledger, planned offline, then
//! pushed back phase by phase. Every phase records its progress in the ledger
//! so any step can be re-run or rolled back.

pub mod backup;
pub mod cli;
pub mod config;
pub mod error;
pub mod format;
pub mod gateway;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod storage;
pub mod util;

pub use error::{ErrorCode, MigrateError, Result, StructuredError};
