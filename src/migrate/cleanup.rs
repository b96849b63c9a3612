//! Cleanup phase: delete legacy ignores that have been migrated.

use super::{Deadline, PhaseSummary};
use crate::error::Result;
use crate::gateway::Gateway;
use crate::storage::Ledger;
use crate::util::progress::ProgressTracker;
use chrono::Utc;
use tracing::{debug, info, warn};

/// Clean up one organization.
///
/// # Errors
///
/// Returns a permanent ledger error. Gateway failures are counted and skipped;
/// an expired deadline stops the loop and marks the summary timed out.
pub fn cleanup_org(
    ledger: &mut Ledger,
    gateway: &dyn Gateway,
    org: &str,
    deadline: &Deadline,
    show_progress: bool,
) -> Result<PhaseSummary> {
    let mut summary = PhaseSummary::new("cleanup", org);
    let pending = ledger.ignores_pending_cleanup(org)?;
    info!(org, pending = pending.len(), "Starting cleanup");

    let progress = ProgressTracker::new(pending.len() as u64, "Deleting legacy ignores", show_progress);
    for (done, ignore) in pending.iter().enumerate() {
        if deadline.is_expired() {
            warn!(
                org,
                remaining = pending.len() - done,
                "Deadline reached; stopping with items pending"
            );
            summary.record_timeout(deadline);
            break;
        }
        progress.inc(1);

        if let Err(error) =
            gateway.delete_ignore(org, &ignore.project_id, &ignore.issue_id, &ignore.id)
        {
            warn!(org, ignore = %ignore.id, %error, "Failed to delete legacy ignore; skipping");
            summary.record_failure();
            continue;
        }

        let now = Utc::now();
        ledger.with_retry("cleanup.mark", |tx| Ledger::mark_ignore_deleted(tx, &ignore.id, now))?;
        debug!(org, ignore = %ignore.id, "Legacy ignore deleted");
        summary.record_success();
    }
    progress.finish_and_clear();

    info!(%summary, "Cleanup finished");
    Ok(summary)
}
