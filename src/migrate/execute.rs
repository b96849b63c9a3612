//! Execute phase: create remote policies for unexecuted plan rows.
//!
//! Each policy is committed on its own, so a timeout or crash keeps every
//! policy already marked; re-running resumes with the remaining rows.

use super::{Deadline, PhaseSummary};
use crate::error::{MigrateError, Result};
use crate::gateway::{CreatePolicyOutcome, Gateway, PolicyAttributes, PolicyMeta};
use crate::model::Policy;
use crate::storage::Ledger;
use crate::util::progress::ProgressTracker;
use chrono::Utc;
use tracing::{debug, info, warn};

/// Knobs for the execute phase.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    /// List what would be created without calling the gateway.
    pub dry_run: bool,
    pub show_progress: bool,
}

/// Remote policy attributes for a plan row.
#[must_use]
pub fn policy_attributes(policy: &Policy) -> PolicyAttributes {
    PolicyAttributes {
        name: format!("Migrated ignore {}", policy.internal_id),
        ignore_type: policy.policy_type.as_str().to_string(),
        reason: policy.reason.clone(),
        expires_at: policy.expires_at,
        asset_key: policy.asset_key.clone(),
    }
}

/// Execute one organization.
///
/// # Errors
///
/// Returns [`MigrateError::StalePlan`] when plan rows have no linked ignores,
/// or a permanent ledger error. Gateway failures are counted and skipped; an
/// expired deadline stops the loop and marks the summary timed out.
pub fn execute_org(
    ledger: &mut Ledger,
    gateway: &dyn Gateway,
    org: &str,
    options: ExecuteOptions,
    deadline: &Deadline,
) -> Result<PhaseSummary> {
    let unlinked = ledger.unlinked_policies(org)?;
    if !unlinked.is_empty() {
        warn!(org, policies = ?unlinked, "Plan rows have no linked ignores");
        return Err(MigrateError::StalePlan {
            org: org.to_string(),
            policies: unlinked.len(),
        });
    }

    let mut summary = PhaseSummary::new("execute", org);
    let policies = ledger.unexecuted_policies(org)?;
    info!(org, pending = policies.len(), dry_run = options.dry_run, "Starting execute");

    let progress = ProgressTracker::new(policies.len() as u64, "Creating policies", options.show_progress);
    for (done, policy) in policies.iter().enumerate() {
        if deadline.is_expired() {
            warn!(
                org,
                remaining = policies.len() - done,
                "Deadline reached; stopping with items pending"
            );
            summary.record_timeout(deadline);
            break;
        }
        progress.inc(1);

        let attrs = policy_attributes(policy);
        if options.dry_run {
            info!(
                org,
                internal_id = %policy.internal_id,
                asset_key = %policy.asset_key,
                policy_type = %policy.policy_type,
                "Would create policy"
            );
            summary.bump("would_create", 1);
            continue;
        }

        let meta = PolicyMeta {
            internal_id: policy.internal_id.clone(),
            source_ignores: policy.source_ignores.clone(),
        };
        let external_id = match gateway.create_policy(org, &attrs, &meta) {
            Ok(CreatePolicyOutcome::Created { id }) => id,
            Ok(CreatePolicyOutcome::AlreadyExists { id }) => {
                summary.bump("already_existed", 1);
                id.unwrap_or_else(|| policy.internal_id.clone())
            }
            Err(error) => {
                warn!(org, internal_id = %policy.internal_id, %error, "Failed to create policy; skipping");
                summary.record_failure();
                continue;
            }
        };

        let now = Utc::now();
        let migrated = ledger.with_retry("execute.mark", |tx| {
            Ledger::mark_policy_executed(tx, &policy.internal_id, &external_id, now)
        })?;
        debug!(org, internal_id = %policy.internal_id, %external_id, migrated, "Policy executed");
        summary.bump("ignores_migrated", migrated);
        summary.record_success();
    }
    progress.finish_and_clear();

    info!(%summary, "Execute finished");
    Ok(summary)
}
