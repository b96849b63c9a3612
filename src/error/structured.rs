//! Structured error output.
//!
//! Provides machine-parseable error information with:
//! - Error codes for categorization
//! - Hints for self-correction
//! - Retryability flags
//! - Context for debugging

use crate::error::MigrateError;
use crate::gateway::GatewayError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Machine-readable error codes.
///
/// These codes are stable and can be used for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // === Ledger Errors (exit code 2) ===
    LedgerNotFound,
    LedgerLocked,
    SchemaMismatch,
    DatabaseError,
    RowShape,
    NotInitialized,

    // === Lookup Errors (exit code 3) ===
    NoOrganizations,
    PolicyNotFound,
    BackupNotFound,

    // === Validation Errors (exit code 4) ===
    ValidationFailed,
    VerificationFailed,

    // === Remote Errors (exit code 5) ===
    RemoteListingFailed,
    RemoteCallFailed,
    RateLimited,

    // === Phase Errors (exit code 6) ===
    PlanBlocked,
    StalePlan,
    PhaseTimeout,
    PhaseIncomplete,

    // === Config Errors (exit code 7) ===
    ConfigError,
    MissingCredential,

    // === I/O Errors (exit code 8) ===
    IoError,
    JsonError,
    YamlError,

    // === Internal Errors (exit code 1) ===
    InternalError,
}

impl ErrorCode {
    /// Get the string representation for JSON output.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LedgerNotFound => "LEDGER_NOT_FOUND",
            Self::LedgerLocked => "LEDGER_LOCKED",
            Self::SchemaMismatch => "SCHEMA_MISMATCH",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::RowShape => "ROW_SHAPE",
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::NoOrganizations => "NO_ORGANIZATIONS",
            Self::PolicyNotFound => "POLICY_NOT_FOUND",
            Self::BackupNotFound => "BACKUP_NOT_FOUND",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::VerificationFailed => "VERIFICATION_FAILED",
            Self::RemoteListingFailed => "REMOTE_LISTING_FAILED",
            Self::RemoteCallFailed => "REMOTE_CALL_FAILED",
            Self::RateLimited => "RATE_LIMITED",
            Self::PlanBlocked => "PLAN_BLOCKED",
            Self::StalePlan => "STALE_PLAN",
            Self::PhaseTimeout => "PHASE_TIMEOUT",
            Self::PhaseIncomplete => "PHASE_INCOMPLETE",
            Self::ConfigError => "CONFIG_ERROR",
            Self::MissingCredential => "MISSING_CREDENTIAL",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::YamlError => "YAML_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Whether re-running the same command may succeed.
    ///
    /// Every phase is resumable, so interrupted phases are retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LedgerLocked
                | Self::RemoteListingFailed
                | Self::RemoteCallFailed
                | Self::RateLimited
                | Self::PhaseTimeout
                | Self::PhaseIncomplete
        )
    }

    /// Get the exit code for this error category.
    ///
    /// - 1: Internal/unknown errors
    /// - 2: Ledger errors
    /// - 3: Lookup errors
    /// - 4: Validation errors
    /// - 5: Remote errors
    /// - 6: Phase errors
    /// - 7: Config errors
    /// - 8: I/O errors
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::LedgerNotFound
            | Self::LedgerLocked
            | Self::SchemaMismatch
            | Self::DatabaseError
            | Self::RowShape
            | Self::NotInitialized => 2,
            Self::NoOrganizations | Self::PolicyNotFound | Self::BackupNotFound => 3,
            Self::ValidationFailed | Self::VerificationFailed => 4,
            Self::RemoteListingFailed | Self::RemoteCallFailed | Self::RateLimited => 5,
            Self::PlanBlocked | Self::StalePlan | Self::PhaseTimeout | Self::PhaseIncomplete => 6,
            Self::ConfigError | Self::MissingCredential => 7,
            Self::IoError | Self::JsonError | Self::YamlError => 8,
            Self::InternalError => 1,
        }
    }
}

/// Structured error for machine-parseable output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Machine-readable error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional hint for fixing the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Whether the operation can be retried
    pub retryable: bool,
    /// Additional context data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl StructuredError {
    /// Create a new structured error from a `MigrateError`.
    #[must_use]
    pub fn from_error(err: &MigrateError) -> Self {
        let (code, context) = Self::extract_code_and_context(err);
        let hint = err.suggestion().map(str::to_string);

        Self {
            code,
            message: err.to_string(),
            hint,
            retryable: code.is_retryable(),
            context,
        }
    }

    /// Serialize to JSON value.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "error": {
                "code": self.code.as_str(),
                "message": self.message,
                "hint": self.hint,
                "retryable": self.retryable,
                "context": self.context,
            }
        })
    }

    /// Format for human-readable output.
    #[must_use]
    pub fn to_human(&self, color: bool) -> String {
        let mut output = String::new();

        if color {
            output.push_str("\x1b[31mError:\x1b[0m ");
        } else {
            output.push_str("Error: ");
        }

        output.push_str(&self.message);

        if let Some(hint) = &self.hint {
            output.push('\n');
            if color {
                output.push_str("\x1b[33mHint:\x1b[0m ");
            } else {
                output.push_str("Hint: ");
            }
            output.push_str(hint);
        }

        output
    }

    fn extract_code_and_context(err: &MigrateError) -> (ErrorCode, Option<Value>) {
        match err {
            MigrateError::LedgerNotFound { path } => (
                ErrorCode::LedgerNotFound,
                Some(json!({"path": path.display().to_string()})),
            ),
            MigrateError::LedgerLocked { attempts } => {
                (ErrorCode::LedgerLocked, Some(json!({"attempts": attempts})))
            }
            MigrateError::SchemaMismatch { expected, found } => (
                ErrorCode::SchemaMismatch,
                Some(json!({"expected": expected, "found": found})),
            ),
            MigrateError::Database(e) if crate::error::is_busy_error(e) => {
                (ErrorCode::LedgerLocked, None)
            }
            MigrateError::Database(_) => (ErrorCode::DatabaseError, None),
            MigrateError::RowShape { table, reason } => (
                ErrorCode::RowShape,
                Some(json!({"table": table, "reason": reason})),
            ),
            MigrateError::NotInitialized => (ErrorCode::NotInitialized, None),
            MigrateError::NoOrganizations { scope } => {
                (ErrorCode::NoOrganizations, Some(json!({"scope": scope})))
            }
            MigrateError::PolicyNotFound { id } => {
                (ErrorCode::PolicyNotFound, Some(json!({"id": id})))
            }
            MigrateError::BackupNotFound { name } => {
                (ErrorCode::BackupNotFound, Some(json!({"name": name})))
            }
            MigrateError::Validation { field, reason } => (
                ErrorCode::ValidationFailed,
                Some(json!({"field": field, "reason": reason})),
            ),
            MigrateError::VerificationFailed { count } => (
                ErrorCode::VerificationFailed,
                Some(json!({"violations": count})),
            ),
            MigrateError::RemoteListing { what, source } => (
                ErrorCode::RemoteListingFailed,
                Some(json!({"what": what, "status": source.status()})),
            ),
            MigrateError::Remote(GatewayError::RateLimited { .. }) => {
                (ErrorCode::RateLimited, None)
            }
            MigrateError::Remote(source) => (
                ErrorCode::RemoteCallFailed,
                Some(json!({"status": source.status()})),
            ),
            MigrateError::PlanBlocked { org, executed } => (
                ErrorCode::PlanBlocked,
                Some(json!({"org": org, "executed_policies": executed})),
            ),
            MigrateError::StalePlan { org, policies } => (
                ErrorCode::StalePlan,
                Some(json!({"org": org, "unlinked_policies": policies})),
            ),
            MigrateError::PhaseTimeout { phase, elapsed } => (
                ErrorCode::PhaseTimeout,
                Some(json!({"phase": phase, "elapsed_secs": elapsed.as_secs()})),
            ),
            MigrateError::PhaseIncomplete { phase, failed } => (
                ErrorCode::PhaseIncomplete,
                Some(json!({"phase": phase, "failed": failed})),
            ),
            MigrateError::Config(_) => (ErrorCode::ConfigError, None),
            MigrateError::MissingCredential => (ErrorCode::MissingCredential, None),
            MigrateError::Io(_) => (ErrorCode::IoError, None),
            MigrateError::Json(_) => (ErrorCode::JsonError, None),
            MigrateError::Yaml(_) => (ErrorCode::YamlError, None),
            MigrateError::WithContext { context, .. } => {
                (ErrorCode::InternalError, Some(json!({"context": context})))
            }
            MigrateError::Other(_) => (ErrorCode::InternalError, None),
        }
    }
}
