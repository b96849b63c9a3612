//! Core data types for `ignore_migrate`.
//!
//! This module defines the records the ledger tracks:
//! - `Ignore` - A legacy exception record and its migration progress
//! - `IgnoreType` - Legacy ignore categories, in resolver priority order
//! - `Issue` - A target-system finding, used to back-fill asset keys
//! - `Project` - A scanned project and its retest progress
//! - `Policy` - One migration-plan unit per (org, asset key)
//! - `Organization` - Tenant metadata for group runs
//! - `CollectionMetadata` - Singleton describing the last gather

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Legacy ignore category.
///
/// Declaration order is resolver priority: stronger, manually reviewed
/// decisions come first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum IgnoreType {
    WontFix,
    NotVulnerable,
    #[default]
    Temporary,
    #[serde(untagged)]
    Other(String),
}

impl IgnoreType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::WontFix => "wont-fix",
            Self::NotVulnerable => "not-vulnerable",
            Self::Temporary => "temporary",
            Self::Other(value) => value,
        }
    }

    /// Resolver bucket: 0 wins over 1 wins over 2.
    ///
    /// Unrecognized types share the `temporary` bucket.
    #[must_use]
    pub const fn bucket(&self) -> u8 {
        match self {
            Self::WontFix => 0,
            Self::NotVulnerable => 1,
            Self::Temporary | Self::Other(_) => 2,
        }
    }
}

impl fmt::Display for IgnoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IgnoreType {
    type Err = crate::error::MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        match normalized.as_str() {
            "wont-fix" | "wontfix" => Ok(Self::WontFix),
            "not-vulnerable" | "notvulnerable" => Ok(Self::NotVulnerable),
            "temporary" | "temporary-ignore" => Ok(Self::Temporary),
            "" => Err(crate::error::MigrateError::validation(
                "ignore_type",
                "cannot be empty",
            )),
            other => Ok(Self::Other(other.to_string())),
        }
    }
}

/// Derived local state of an ignore, from least to most advanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreState {
    /// Gathered but no asset key could be correlated.
    Unmapped,
    /// Has an asset key, not part of a plan.
    Collected,
    /// Linked to a plan but lost conflict resolution.
    Superseded,
    /// Chosen to become the policy for its asset key.
    Selected,
    /// Remote policy exists.
    Migrated,
    /// Legacy record deleted after migration.
    Deleted,
}

impl IgnoreState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unmapped => "unmapped",
            Self::Collected => "collected",
            Self::Superseded => "superseded",
            Self::Selected => "selected",
            Self::Migrated => "migrated",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for IgnoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A legacy exception record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ignore {
    pub id: String,
    pub issue_id: String,
    pub org_id: String,
    pub project_id: String,
    pub reason: String,
    pub ignore_type: IgnoreType,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub asset_key: String,
    /// Opaque serialized snapshot of the source record. Written once.
    pub original_state: String,
    /// SHA-256 of the most recently observed source payload.
    #[serde(default)]
    pub content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migrated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_policy_id: Option<String>,
    #[serde(default)]
    pub selected_for_migration: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gathered_at: Option<DateTime<Utc>>,
}

impl Ignore {
    /// Build a freshly gathered ignore with no migration progress.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        org_id: impl Into<String>,
        project_id: impl Into<String>,
        issue_id: impl Into<String>,
        ignore_type: IgnoreType,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            issue_id: issue_id.into(),
            org_id: org_id.into(),
            project_id: project_id.into(),
            reason: String::new(),
            ignore_type,
            created_at,
            expires_at: None,
            asset_key: String::new(),
            original_state: "{}".to_string(),
            content_hash: String::new(),
            deleted_at: None,
            migrated_at: None,
            policy_id: None,
            internal_policy_id: None,
            selected_for_migration: false,
            gathered_at: None,
        }
    }

    #[must_use]
    pub const fn is_migrated(&self) -> bool {
        self.migrated_at.is_some()
    }

    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    #[must_use]
    pub fn state(&self) -> IgnoreState {
        if self.deleted_at.is_some() {
            IgnoreState::Deleted
        } else if self.migrated_at.is_some() {
            IgnoreState::Migrated
        } else if self.selected_for_migration {
            IgnoreState::Selected
        } else if self.internal_policy_id.is_some() {
            IgnoreState::Superseded
        } else if self.asset_key.is_empty() {
            IgnoreState::Unmapped
        } else {
            IgnoreState::Collected
        }
    }
}

/// A finding in the target system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub org_id: String,
    pub project_id: String,
    pub asset_key: String,
    /// Legacy-compatible correlation key, matched against `Ignore::issue_id`.
    pub project_key: String,
    pub original_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gathered_at: Option<DateTime<Utc>>,
}

/// A scanned project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub org_id: String,
    pub name: String,
    /// Remote target reference used to re-fetch `target_information`.
    #[serde(default)]
    pub target_id: String,
    /// Opaque serialized target descriptor; empty until known.
    #[serde(default)]
    pub target_information: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retested_at: Option<DateTime<Utc>>,
    /// CLI-uploaded projects cannot be rescanned through the API.
    pub is_cli_project: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gathered_at: Option<DateTime<Utc>>,
}

/// A migration-plan unit: one policy per (org, asset key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Locally generated, immutable.
    pub internal_id: String,
    pub org_id: String,
    pub asset_key: String,
    pub policy_type: IgnoreType,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Ordered ids of every source ignore.
    pub source_ignores: Vec<String>,
    pub selected_ignore_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Policy {
    #[must_use]
    pub const fn is_executed(&self) -> bool {
        self.external_id.is_some()
    }

    /// Source ids as stored in the ledger.
    #[must_use]
    pub fn source_ignores_joined(&self) -> String {
        self.source_ignores.join(",")
    }
}

/// Split a stored comma-joined id list.
#[must_use]
pub fn split_source_ignores(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Tenant metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub name: String,
    pub slug: String,
    pub original_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gathered_at: Option<DateTime<Utc>>,
}

/// Singleton describing the last completed gather.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    pub collection_completed_at: DateTime<Utc>,
    pub collection_version: String,
    pub api_version: String,
}
