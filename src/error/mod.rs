//! Error types and handling for `ignore_migrate`.
//!
//! # Design
//!
//! - Uses `thiserror` for derive-based error types
//! - Supports `anyhow` integration through [`MigrateError::Other`]
//! - Separates transient local failures (busy/locked ledger) from permanent ones
//! - Provides recovery hints and stable exit codes for the CLI

mod context;
mod structured;

pub use context::{OptionExt, ResultExt};
pub use structured::{ErrorCode, StructuredError};

use crate::gateway::GatewayError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Primary error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    // === Ledger Errors ===
    /// Ledger file not found at the specified path.
    #[error("Ledger not found at '{path}'")]
    LedgerNotFound { path: PathBuf },

    /// Ledger stayed busy/locked after every retry attempt.
    #[error("Ledger is locked after {attempts} attempts")]
    LedgerLocked { attempts: u32 },

    /// On-disk schema is newer than this binary understands.
    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: i32, found: i32 },

    /// `SQLite` database error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A row did not have the shape the typed repository expects.
    #[error("Unexpected row in '{table}': {reason}")]
    RowShape { table: String, reason: String },

    // === Lookup Errors ===
    /// No organization matched the requested scope.
    #[error("No organizations found for {scope}")]
    NoOrganizations { scope: String },

    /// Policy plan row missing.
    #[error("Policy not found: {id}")]
    PolicyNotFound { id: String },

    /// Backup snapshot missing.
    #[error("Backup not found: {name}")]
    BackupNotFound { name: String },

    // === Validation Errors ===
    /// Field validation failed.
    #[error("Validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },

    // === Remote Errors ===
    /// Initial listing call failed; nothing further can be gathered.
    #[error("Failed to list {what}: {source}")]
    RemoteListing {
        what: String,
        #[source]
        source: GatewayError,
    },

    /// A single remote call failed.
    #[error("Remote call failed: {0}")]
    Remote(#[from] GatewayError),

    // === Phase Errors ===
    /// Plan refused because executed policies would be orphaned.
    #[error("Org {org} has {executed} executed policies; roll back before re-planning")]
    PlanBlocked { org: String, executed: usize },

    /// Plan rows lost their ignore links; executing them would mark nothing.
    #[error("Org {org} has {policies} planned policies with no linked ignores; re-run plan")]
    StalePlan { org: String, policies: usize },

    /// Phase exceeded its wall-clock budget.
    #[error("Phase '{phase}' timed out after {elapsed:?}")]
    PhaseTimeout { phase: String, elapsed: Duration },

    /// Some items of a phase failed.
    #[error("Phase '{phase}' finished with {failed} failed item(s)")]
    PhaseIncomplete { phase: String, failed: usize },

    /// Ledger invariants violated.
    #[error("Ledger verification found {count} violation(s)")]
    VerificationFailed { count: usize },

    // === Configuration Errors ===
    /// Configuration file error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Workspace not initialized.
    #[error("Workspace not initialized: run 'igm gather' first")]
    NotInitialized,

    /// Credential missing for a command that talks to the remote API.
    #[error("Missing API credential")]
    MissingCredential,

    // === I/O Errors ===
    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // === Wrapped errors ===
    /// Error with additional context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Wrapped anyhow error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MigrateError {
    /// Is this a busy/locked ledger error worth retrying?
    #[must_use]
    pub fn is_transient_lock(&self) -> bool {
        match self {
            Self::Database(err) => is_busy_error(err),
            _ => false,
        }
    }

    /// Can the user fix this without code changes?
    #[must_use]
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::LedgerNotFound { .. }
                | Self::NotInitialized
                | Self::NoOrganizations { .. }
                | Self::Validation { .. }
                | Self::MissingCredential
                | Self::PlanBlocked { .. }
                | Self::StalePlan { .. }
                | Self::BackupNotFound { .. }
        )
    }

    /// Human-friendly suggestion for fixing this error.
    #[must_use]
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run: igm gather --org <ORG>"),
            Self::LedgerNotFound { .. } => Some("Check --db or run: igm gather"),
            Self::MissingCredential => Some("Pass --token or set IGM_TOKEN"),
            Self::NoOrganizations { .. } => Some("Gather the org or group first"),
            Self::PlanBlocked { .. } => Some("Run: igm rollback, or re-plan with --force"),
            Self::StalePlan { .. } => Some("Run: igm plan --org <ORG>"),
            Self::PhaseTimeout { .. } => Some("Re-run the phase; committed progress is kept"),
            Self::PhaseIncomplete { .. } => Some("Re-run the phase to retry failed items"),
            Self::LedgerLocked { .. } => Some("Another process holds the ledger; retry later"),
            Self::VerificationFailed { .. } => Some("Inspect with: igm print / igm print-plan"),
            _ => None,
        }
    }

    /// Create a validation error for a specific field.
    #[must_use]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a row-shape error for a table.
    #[must_use]
    pub fn row_shape(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RowShape {
            table: table.into(),
            reason: reason.into(),
        }
    }
}

/// Whether a `rusqlite` error is a transient busy/locked condition.
#[must_use]
pub fn is_busy_error(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}

/// Result type using `MigrateError`.
pub type Result<T> = std::result::Result<T, MigrateError>;
