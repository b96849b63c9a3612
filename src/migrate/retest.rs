//! Retest phase: trigger a rescan of every project that received policies.

use super::{Deadline, PhaseSummary};
use crate::error::Result;
use crate::gateway::{Gateway, ProjectTarget};
use crate::model::Project;
use crate::storage::Ledger;
use crate::util::progress::ProgressTracker;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Retest one organization.
///
/// CLI projects are never rescanned. A project without a stored target
/// descriptor has it fetched and persisted first.
///
/// # Errors
///
/// Returns a permanent ledger error. Gateway failures are counted and skipped;
/// an expired deadline stops the loop and marks the summary timed out.
pub fn retest_org(
    ledger: &mut Ledger,
    gateway: &dyn Gateway,
    org: &str,
    deadline: &Deadline,
    show_progress: bool,
) -> Result<PhaseSummary> {
    let mut summary = PhaseSummary::new("retest", org);
    let projects = ledger.projects_pending_retest(org)?;
    info!(org, pending = projects.len(), "Starting retest");

    let progress = ProgressTracker::new(projects.len() as u64, "Triggering rescans", show_progress);
    for (done, project) in projects.iter().enumerate() {
        if deadline.is_expired() {
            warn!(
                org,
                remaining = projects.len() - done,
                "Deadline reached; stopping with items pending"
            );
            summary.record_timeout(deadline);
            break;
        }
        progress.inc(1);

        let Some(descriptor) = target_descriptor(ledger, gateway, org, project, &mut summary)? else {
            summary.record_failure();
            continue;
        };
        let target = ProjectTarget {
            project_id: project.id.clone(),
            target_id: project.target_id.clone(),
            descriptor,
        };
        if let Err(error) = gateway.trigger_rescan(org, &target) {
            warn!(org, project = %project.id, %error, "Failed to trigger rescan; skipping");
            summary.record_failure();
            continue;
        }

        let now = Utc::now();
        ledger.with_retry("retest.mark", |tx| {
            Ledger::mark_project_retested(tx, &project.id, now)
        })?;
        debug!(org, project = %project.id, "Rescan triggered");
        summary.record_success();
    }
    progress.finish_and_clear();

    info!(%summary, "Retest finished");
    Ok(summary)
}

/// Stored descriptor, or one fetched (and persisted) from the gateway.
///
/// `Ok(None)` means the descriptor is unavailable for this project only.
fn target_descriptor(
    ledger: &mut Ledger,
    gateway: &dyn Gateway,
    org: &str,
    project: &Project,
    summary: &mut PhaseSummary,
) -> Result<Option<Value>> {
    if !project.target_information.is_empty() {
        return match serde_json::from_str(&project.target_information) {
            Ok(value) => Ok(Some(value)),
            Err(error) => {
                warn!(org, project = %project.id, %error, "Stored target descriptor is not JSON");
                Ok(None)
            }
        };
    }
    if project.target_id.is_empty() {
        warn!(org, project = %project.id, "Project has no target reference");
        return Ok(None);
    }

    let descriptor = match gateway.resolve_project_target(org, &project.target_id) {
        Ok(descriptor) => descriptor,
        Err(error) => {
            warn!(org, project = %project.id, %error, "Failed to resolve target");
            return Ok(None);
        }
    };
    let serialized = descriptor.to_string();
    ledger.with_retry("retest.target", |tx| {
        Ledger::set_project_target_information(tx, &project.id, &serialized)
    })?;
    summary.bump("targets_resolved", 1);
    Ok(Some(descriptor))
}
