//! Status: pure aggregation of ledger counts into phase progress.

use crate::error::Result;
use crate::storage::{Ledger, LedgerCounts};
use serde::{Serialize, Serializer};
use std::fmt;

/// Overall migration stage of an organization, derived only from counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StatusLabel {
    NotStarted,
    Gathered,
    Planned,
    Executing,
    Retesting,
    CleaningUp,
    Complete,
}

impl StatusLabel {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "NOT STARTED",
            Self::Gathered => "GATHERED",
            Self::Planned => "PLANNED",
            Self::Executing => "EXECUTING",
            Self::Retesting => "RETESTING",
            Self::CleaningUp => "CLEANING UP",
            Self::Complete => "COMPLETE",
        }
    }

    /// Derive the label from counts, first matching stage wins.
    #[must_use]
    pub const fn from_counts(counts: &LedgerCounts) -> Self {
        if counts.ignores == 0 {
            Self::NotStarted
        } else if counts.policies == 0 {
            Self::Gathered
        } else if counts.policies_executed == 0 {
            Self::Planned
        } else if counts.policies_executed < counts.policies {
            Self::Executing
        } else if counts.retest_done < counts.retest_eligible {
            Self::Retesting
        } else if counts.ignores_deleted < counts.ignores_migrated {
            Self::CleaningUp
        } else {
            Self::Complete
        }
    }
}

impl fmt::Display for StatusLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StatusLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Percentage of `done` over `total`; zero when there is nothing to do.
#[must_use]
pub fn percentage(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (done as f64 * 100.0) / total as f64
}

/// Progress of one phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PhaseProgress {
    pub done: usize,
    pub total: usize,
    pub percent: f64,
}

impl PhaseProgress {
    #[must_use]
    pub fn new(done: usize, total: usize) -> Self {
        Self {
            done,
            total,
            percent: percentage(done, total),
        }
    }
}

/// Status report of one organization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrgStatus {
    pub org: String,
    pub label: StatusLabel,
    /// Ignores with an asset key over all gathered ignores.
    pub mapped: PhaseProgress,
    /// Selected ignores over planned policies.
    pub selected: PhaseProgress,
    /// Policies with a remote id over planned policies.
    pub executed: PhaseProgress,
    /// Rescanned projects over non-CLI projects with a migrated ignore.
    pub retested: PhaseProgress,
    /// Deleted legacy ignores over migrated ignores.
    pub cleaned_up: PhaseProgress,
    pub counts: LedgerCounts,
}

impl OrgStatus {
    #[must_use]
    pub fn from_counts(org: &str, counts: LedgerCounts) -> Self {
        Self {
            org: org.to_string(),
            label: StatusLabel::from_counts(&counts),
            mapped: PhaseProgress::new(counts.ignores_with_asset_key, counts.ignores),
            selected: PhaseProgress::new(counts.ignores_selected, counts.policies),
            executed: PhaseProgress::new(counts.policies_executed, counts.policies),
            retested: PhaseProgress::new(counts.retest_done, counts.retest_eligible),
            cleaned_up: PhaseProgress::new(counts.ignores_deleted, counts.ignores_migrated),
            counts,
        }
    }
}

/// Read the status of one organization.
///
/// # Errors
///
/// Returns an error if the ledger query fails.
pub fn org_status(ledger: &Ledger, org: &str) -> Result<OrgStatus> {
    Ok(OrgStatus::from_counts(org, ledger.org_counts(org)?))
}
