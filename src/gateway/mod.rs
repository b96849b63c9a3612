//! Remote gateway contract.
//!
//! The migration phases never speak HTTP themselves; they depend on the
//! [`Gateway`] trait. [`http::HttpGateway`] is the production implementation.
//!
//! Idempotency requirement: [`Gateway::create_policy`] reports a remote
//! duplicate as [`CreatePolicyOutcome::AlreadyExists`], never as an error.

pub mod http;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised at the gateway boundary.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Non-success HTTP response or transport failure.
    #[error("HTTP error{}: {message}", status.map(|s| format!(" {s}")).unwrap_or_default())]
    Http {
        status: Option<u16>,
        message: String,
    },

    /// Rate limited after exhausting back-off.
    #[error("Rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    /// Response body did not match the expected shape.
    #[error("Unexpected response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    /// Caller supplied an unusable argument.
    #[error("Invalid input: {field}: {reason}")]
    InvalidInput { field: String, reason: String },
}

impl GatewayError {
    /// HTTP status when one was received.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => *status,
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

/// Organization as reported by the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteOrganization {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub group_id: Option<String>,
    pub raw: Value,
}

/// Project as reported by the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteProject {
    pub id: String,
    pub name: String,
    /// Integration origin; `cli` marks command-line uploads.
    pub origin: String,
    pub target_id: String,
    /// Target descriptor when the listing embeds one.
    pub target: Option<Value>,
}

impl RemoteProject {
    #[must_use]
    pub fn is_cli(&self) -> bool {
        self.origin.eq_ignore_ascii_case("cli")
    }
}

/// Legacy ignore as reported by the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteIgnore {
    pub id: String,
    pub issue_id: String,
    pub reason: String,
    pub ignore_type: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Full source payload, preserved verbatim in the ledger.
    pub raw: Value,
}

/// Target-system finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFinding {
    pub id: String,
    pub project_id: String,
    pub asset_key: String,
    pub project_key: String,
    pub raw: Value,
}

/// Resolved target descriptor used to trigger a rescan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectTarget {
    pub project_id: String,
    pub target_id: String,
    pub descriptor: Value,
}

/// Attributes of a policy to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyAttributes {
    pub name: String,
    pub ignore_type: String,
    pub reason: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub asset_key: String,
}

/// Provenance attached to a created policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyMeta {
    pub internal_id: String,
    pub source_ignores: Vec<String>,
}

/// Result of a create-policy call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreatePolicyOutcome {
    Created { id: String },
    /// Remote reported a duplicate; the existing id when it disclosed one.
    AlreadyExists { id: Option<String> },
}

/// Operations the migration engine needs from the remote API.
pub trait Gateway {
    /// List the organizations belonging to a group.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call fails.
    fn list_orgs_in_group(&self, group: &str) -> Result<Vec<RemoteOrganization>, GatewayError>;

    /// List every project of an organization.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call fails.
    fn list_projects(&self, org: &str) -> Result<Vec<RemoteProject>, GatewayError>;

    /// List legacy ignores of a project. Order is unspecified.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call fails.
    fn list_ignores(&self, org: &str, project: &str) -> Result<Vec<RemoteIgnore>, GatewayError>;

    /// List target-system findings, optionally scoped to one project.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call fails.
    fn list_findings(
        &self,
        org: &str,
        project: Option<&str>,
    ) -> Result<Vec<RemoteFinding>, GatewayError>;

    /// Fetch the target descriptor of a project.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call fails.
    fn resolve_project_target(&self, org: &str, target_id: &str) -> Result<Value, GatewayError>;

    /// Create a policy. A remote duplicate is reported as `AlreadyExists`.
    ///
    /// # Errors
    ///
    /// Returns an error for any failure other than a duplicate.
    fn create_policy(
        &self,
        org: &str,
        attrs: &PolicyAttributes,
        meta: &PolicyMeta,
    ) -> Result<CreatePolicyOutcome, GatewayError>;

    /// Trigger a rescan of a project target.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call fails.
    fn trigger_rescan(&self, org: &str, target: &ProjectTarget) -> Result<(), GatewayError>;

    /// Delete a policy by external id.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call fails.
    fn delete_policy(&self, org: &str, policy_id: &str) -> Result<(), GatewayError>;

    /// Delete a legacy ignore. `issue_id` is the stored issue id, never one
    /// parsed back out of `ignore_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call fails.
    fn delete_ignore(
        &self,
        org: &str,
        project: &str,
        issue_id: &str,
        ignore_id: &str,
    ) -> Result<(), GatewayError>;

    /// Recreate a legacy ignore from its preserved payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call fails.
    fn create_ignore(
        &self,
        org: &str,
        project: &str,
        ignore: &RemoteIgnore,
    ) -> Result<(), GatewayError>;

    /// Gateway name for logging.
    fn name(&self) -> &'static str;
}
