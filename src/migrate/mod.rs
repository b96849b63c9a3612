//! Migration phases.
//!
//! Gather → Plan → Execute → Retest → Cleanup is a strict pipeline over the
//! same [`Ledger`]. Every phase works on fully materialized row sets, writes
//! through [`Ledger::with_retry`], and can be re-run safely.
//!
//! Failure taxonomy:
//! - busy/locked ledger: retried by the ledger
//! - per-item remote failure: logged, counted in [`PhaseSummary::failed`], skipped
//! - permanent local failure or failed initial listing: aborts the phase

pub mod cleanup;
pub mod execute;
pub mod gather;
pub mod plan;
pub mod resolve;
pub mod retest;
pub mod rollback;
pub mod status;
pub mod verify;

use crate::error::{MigrateError, Result};
use crate::storage::Ledger;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Outcome counters for one phase over one organization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PhaseSummary {
    pub phase: String,
    pub org: String,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Phase-specific counters (`conflicts`, `unmapped`, `drifted`, ...).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, usize>,
    /// The deadline stopped the phase before every item was tried.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
    #[serde(skip)]
    elapsed: Duration,
}

impl PhaseSummary {
    #[must_use]
    pub fn new(phase: &str, org: &str) -> Self {
        Self {
            phase: phase.to_string(),
            org: org.to_string(),
            ..Self::default()
        }
    }

    pub fn record_success(&mut self) {
        self.attempted += 1;
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self) {
        self.attempted += 1;
        self.failed += 1;
    }

    /// Add `n` to a named detail counter.
    pub fn bump(&mut self, key: &str, n: usize) {
        *self.details.entry(key.to_string()).or_insert(0) += n;
    }

    #[must_use]
    pub fn detail(&self, key: &str) -> usize {
        self.details.get(key).copied().unwrap_or(0)
    }

    /// Record that `deadline` ran out with items still pending.
    pub fn record_timeout(&mut self, deadline: &Deadline) {
        self.timed_out = true;
        self.elapsed = deadline.elapsed();
    }

    /// Fail when the phase timed out, or when items were attempted and none
    /// succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::PhaseTimeout`] for a timed-out phase and
    /// [`MigrateError::PhaseIncomplete`] when the phase made no progress.
    pub fn ensure_progress(&self) -> Result<()> {
        if self.timed_out {
            return Err(MigrateError::PhaseTimeout {
                phase: self.phase.clone(),
                elapsed: self.elapsed,
            });
        }
        if self.failed > 0 && self.succeeded == 0 {
            return Err(MigrateError::PhaseIncomplete {
                phase: self.phase.clone(),
                failed: self.failed,
            });
        }
        Ok(())
    }
}

impl fmt::Display for PhaseSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}]: attempted {}, succeeded {}, failed {}",
            self.phase, self.org, self.attempted, self.succeeded, self.failed
        )?;
        for (key, value) in &self.details {
            write!(f, ", {key} {value}")?;
        }
        if self.timed_out {
            write!(f, ", timed out")?;
        }
        Ok(())
    }
}

/// Cooperative wall-clock budget checked between items.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Option<Duration>,
}

impl Deadline {
    /// A deadline `budget` from now.
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget: Some(budget),
        }
    }

    /// A deadline that never expires.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            started: Instant::now(),
            budget: None,
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.budget.is_some_and(|budget| self.elapsed() >= budget)
    }
}

/// Which organizations a command acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Org(String),
    Group(String),
}

impl Scope {
    /// Resolve the scope to org ids recorded in the ledger.
    ///
    /// A single org always resolves to itself, even before it was gathered.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::NoOrganizations`] when a group has no gathered orgs.
    pub fn resolve_local(&self, ledger: &Ledger) -> Result<Vec<String>> {
        match self {
            Self::Org(org) => Ok(vec![org.clone()]),
            Self::Group(group) => {
                let orgs: Vec<String> = ledger
                    .organizations_in_group(group)?
                    .into_iter()
                    .map(|org| org.id)
                    .collect();
                if orgs.is_empty() {
                    return Err(MigrateError::NoOrganizations {
                        scope: self.to_string(),
                    });
                }
                Ok(orgs)
            }
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Org(org) => write!(f, "org {org}"),
            Self::Group(group) => write!(f, "group {group}"),
        }
    }
}
