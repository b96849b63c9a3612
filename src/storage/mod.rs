//! Durable migration ledger.
//!
//! The ledger is the single source of truth for migration progress. Every
//! phase reads and writes through [`Ledger`]; nothing keeps long-lived
//! in-memory state between runs.

pub mod schema;
pub mod sqlite;

pub use sqlite::{Ledger, LedgerCounts, RetryPolicy, RollbackCounts, UpsertOutcome};
