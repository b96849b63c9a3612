//! Gather phase: populate the ledger from the remote API.
//!
//! Gather is idempotent. Re-running it converges content columns to the latest
//! observed remote state and never touches progress columns; an ignore whose
//! source changed after migration is reported as drifted.

use super::{PhaseSummary, Scope};
use crate::error::{MigrateError, Result};
use crate::gateway::{Gateway, RemoteFinding, RemoteIgnore, RemoteOrganization, RemoteProject};
use crate::model::{CollectionMetadata, Ignore, Issue, Organization, Project};
use crate::storage::{Ledger, UpsertOutcome};
use crate::util::content_hash;
use crate::util::progress::ProgressTracker;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// Versions recorded in the collection metadata after a gather.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSettings {
    pub collection_version: String,
    pub api_version: String,
}

/// Drives the gather phase against one gateway.
pub struct Gatherer<'a> {
    gateway: &'a dyn Gateway,
    settings: CollectionSettings,
    show_progress: bool,
}

impl<'a> Gatherer<'a> {
    #[must_use]
    pub fn new(gateway: &'a dyn Gateway, settings: CollectionSettings) -> Self {
        Self {
            gateway,
            settings,
            show_progress: false,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Gather every organization in scope, then stamp the collection metadata.
    ///
    /// # Errors
    ///
    /// Fails on a failed organization, project or finding listing, or on a
    /// permanent ledger error. Per-project ignore listing failures are counted
    /// and skipped.
    pub fn run(&self, ledger: &mut Ledger, scope: &Scope) -> Result<Vec<PhaseSummary>> {
        info!(%scope, gateway = self.gateway.name(), "Starting gather");
        let orgs = self.organizations(ledger, scope)?;

        let mut summaries = Vec::with_capacity(orgs.len());
        for org in &orgs {
            summaries.push(self.gather_org(ledger, org)?);
        }

        let meta = CollectionMetadata {
            collection_completed_at: Utc::now(),
            collection_version: self.settings.collection_version.clone(),
            api_version: self.settings.api_version.clone(),
        };
        ledger.with_retry("gather.metadata", |tx| {
            Ledger::set_collection_metadata_in_tx(tx, &meta)
        })?;
        Ok(summaries)
    }

    fn organizations(&self, ledger: &mut Ledger, scope: &Scope) -> Result<Vec<String>> {
        let now = Utc::now();
        match scope {
            Scope::Org(org) => {
                if ledger.get_organization(org)?.is_none() {
                    let row = Organization {
                        id: org.clone(),
                        group_id: None,
                        name: String::new(),
                        slug: String::new(),
                        original_state: "{}".to_string(),
                        gathered_at: Some(now),
                    };
                    ledger.with_retry("gather.organizations", |tx| {
                        Ledger::upsert_organization_in_tx(tx, &row)
                    })?;
                }
                Ok(vec![org.clone()])
            }
            Scope::Group(group) => {
                let remote = self.gateway.list_orgs_in_group(group).map_err(|source| {
                    MigrateError::RemoteListing {
                        what: format!("organizations of group {group}"),
                        source,
                    }
                })?;
                if remote.is_empty() {
                    return Err(MigrateError::NoOrganizations {
                        scope: scope.to_string(),
                    });
                }
                let rows: Vec<Organization> = remote
                    .iter()
                    .map(|org| organization_row(group, org, now))
                    .collect();
                ledger.with_retry("gather.organizations", |tx| {
                    for row in &rows {
                        Ledger::upsert_organization_in_tx(tx, row)?;
                    }
                    Ok(())
                })?;
                Ok(rows.into_iter().map(|row| row.id).collect())
            }
        }
    }

    fn gather_org(&self, ledger: &mut Ledger, org: &str) -> Result<PhaseSummary> {
        let mut summary = PhaseSummary::new("gather", org);
        let now = Utc::now();

        let projects = self
            .gateway
            .list_projects(org)
            .map_err(|source| MigrateError::RemoteListing {
                what: format!("projects of org {org}"),
                source,
            })?;
        let project_rows: Vec<Project> = projects
            .iter()
            .map(|project| project_row(org, project, now))
            .collect();
        ledger.with_retry("gather.projects", |tx| {
            for row in &project_rows {
                Ledger::upsert_project_in_tx(tx, row)?;
            }
            Ok(())
        })?;
        summary.bump("projects", project_rows.len());
        info!(org, projects = project_rows.len(), "Projects gathered");

        let progress = ProgressTracker::new(projects.len() as u64, "Listing ignores", self.show_progress);
        for project in &projects {
            progress.inc(1);
            let mut remote = match self.gateway.list_ignores(org, &project.id) {
                Ok(remote) => remote,
                Err(error) => {
                    warn!(org, project = %project.id, %error, "Failed to list ignores; skipping project");
                    summary.record_failure();
                    continue;
                }
            };
            // Listing order is unspecified; fix it before anything tie-sensitive.
            remote.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

            let rows: Vec<Ignore> = remote
                .iter()
                .map(|item| ignore_row(org, &project.id, item, now))
                .collect();
            let outcomes = ledger.with_retry("gather.ignores", |tx| {
                let mut outcomes = Vec::with_capacity(rows.len());
                for row in &rows {
                    outcomes.push(Ledger::upsert_ignore_in_tx(tx, row)?);
                }
                Ok(outcomes)
            })?;

            for (row, outcome) in rows.iter().zip(outcomes) {
                match outcome {
                    UpsertOutcome::Inserted => summary.bump("inserted", 1),
                    UpsertOutcome::Updated => summary.bump("updated", 1),
                    UpsertOutcome::Unchanged => summary.bump("unchanged", 1),
                    UpsertOutcome::Drifted => {
                        warn!(org, ignore = %row.id, "Source ignore changed after migration");
                        summary.bump("drifted", 1);
                    }
                }
            }
            debug!(org, project = %project.id, ignores = rows.len(), "Ignores gathered");
            summary.bump("ignores", rows.len());
            summary.record_success();
        }
        progress.finish_and_clear();

        let spinner = ProgressTracker::new_spinner("Listing findings", self.show_progress);
        let findings = self.gateway.list_findings(org, None);
        spinner.finish_and_clear();
        let findings = findings.map_err(|source| MigrateError::RemoteListing {
            what: format!("findings of org {org}"),
            source,
        })?;
        let issue_rows: Vec<Issue> = findings
            .iter()
            .map(|finding| issue_row(org, finding, now))
            .collect();
        let filled = ledger.with_retry("gather.findings", |tx| {
            for row in &issue_rows {
                Ledger::upsert_issue_in_tx(tx, row)?;
            }
            Ledger::backfill_asset_keys(tx, org)
        })?;
        summary.bump("findings", issue_rows.len());
        summary.bump("asset_keys_filled", filled);

        info!(%summary, "Gather finished");
        Ok(summary)
    }
}

fn organization_row(group: &str, org: &RemoteOrganization, now: DateTime<Utc>) -> Organization {
    Organization {
        id: org.id.clone(),
        group_id: Some(org.group_id.clone().unwrap_or_else(|| group.to_string())),
        name: org.name.clone(),
        slug: org.slug.clone(),
        original_state: org.raw.to_string(),
        gathered_at: Some(now),
    }
}

fn project_row(org: &str, project: &RemoteProject, now: DateTime<Utc>) -> Project {
    Project {
        id: project.id.clone(),
        org_id: org.to_string(),
        name: project.name.clone(),
        target_id: project.target_id.clone(),
        target_information: project
            .target
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default(),
        retested_at: None,
        is_cli_project: project.is_cli(),
        gathered_at: Some(now),
    }
}

fn ignore_row(org: &str, project: &str, remote: &RemoteIgnore, now: DateTime<Utc>) -> Ignore {
    let ignore_type = remote.ignore_type.parse().unwrap_or_default();
    let mut row = Ignore::new(
        &remote.id,
        org,
        project,
        &remote.issue_id,
        ignore_type,
        remote.created_at,
    );
    row.reason.clone_from(&remote.reason);
    row.expires_at = remote.expires_at;
    row.original_state = remote.raw.to_string();
    row.content_hash = content_hash(&remote.raw);
    row.gathered_at = Some(now);
    row
}

fn issue_row(org: &str, finding: &RemoteFinding, now: DateTime<Utc>) -> Issue {
    Issue {
        id: finding.id.clone(),
        org_id: org.to_string(),
        project_id: finding.project_id.clone(),
        asset_key: finding.asset_key.clone(),
        project_key: finding.project_key.clone(),
        original_state: finding.raw.to_string(),
        gathered_at: Some(now),
    }
}
