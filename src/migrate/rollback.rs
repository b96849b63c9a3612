//! Rollback: reset local migration bookkeeping for an organization.
//!
//! The local reset never touches the remote side. With `remote` set, a
//! best-effort reconciliation runs first: policies created by execute are
//! deleted and legacy ignores deleted by cleanup are recreated from their
//! preserved payload. Reconciliation failures are counted, never fatal.

use super::PhaseSummary;
use crate::error::Result;
use crate::gateway::{Gateway, RemoteIgnore};
use crate::model::Ignore;
use crate::storage::Ledger;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Roll back one organization.
///
/// Pass a gateway to reconcile the remote side before the local reset.
///
/// # Errors
///
/// Returns a permanent ledger error.
pub fn rollback_org(
    ledger: &mut Ledger,
    gateway: Option<&dyn Gateway>,
    org: &str,
) -> Result<PhaseSummary> {
    let mut summary = PhaseSummary::new("rollback", org);

    if let Some(gateway) = gateway {
        reconcile_remote(ledger, gateway, org, &mut summary)?;
    }

    let counts = ledger.with_retry("rollback.reset", |tx| Ledger::rollback_org(tx, org))?;
    summary.bump("ignores_reset", counts.ignores_reset);
    summary.bump("policies_reset", counts.policies_reset);
    summary.bump("projects_reset", counts.projects_reset);

    info!(%summary, "Rollback finished");
    Ok(summary)
}

fn reconcile_remote(
    ledger: &Ledger,
    gateway: &dyn Gateway,
    org: &str,
    summary: &mut PhaseSummary,
) -> Result<()> {
    for policy in ledger.policies_by_org(org)? {
        let Some(external_id) = policy.external_id.as_deref() else {
            continue;
        };
        // A duplicate reported without an id was stored under its internal id;
        // the real remote policy is unknown and cannot be deleted by id.
        if external_id == policy.internal_id {
            warn!(org, internal_id = %policy.internal_id, "Remote policy id unknown; not deleting");
            summary.bump("remote_policies_unknown", 1);
            continue;
        }
        match gateway.delete_policy(org, external_id) {
            Ok(()) => {
                debug!(org, %external_id, "Remote policy deleted");
                summary.bump("remote_policies_deleted", 1);
                summary.record_success();
            }
            Err(error) => {
                warn!(org, %external_id, %error, "Failed to delete remote policy");
                summary.record_failure();
            }
        }
    }

    for ignore in ledger.deleted_ignores(org)? {
        let restored = restore_payload(&ignore);
        match gateway.create_ignore(org, &ignore.project_id, &restored) {
            Ok(()) => {
                debug!(org, ignore = %ignore.id, "Legacy ignore recreated");
                summary.bump("remote_ignores_recreated", 1);
                summary.record_success();
            }
            Err(error) => {
                warn!(org, ignore = %ignore.id, %error, "Failed to recreate legacy ignore");
                summary.record_failure();
            }
        }
    }
    Ok(())
}

/// Rebuild the remote ignore from the ledger row and its original payload.
#[must_use]
pub fn restore_payload(ignore: &Ignore) -> RemoteIgnore {
    let raw = serde_json::from_str(&ignore.original_state).unwrap_or_else(|error| {
        warn!(ignore = %ignore.id, %error, "Original payload is not JSON; recreating from columns");
        Value::Null
    });
    RemoteIgnore {
        id: ignore.id.clone(),
        issue_id: ignore.issue_id.clone(),
        reason: ignore.reason.clone(),
        ignore_type: ignore.ignore_type.as_str().to_string(),
        created_at: ignore.created_at,
        expires_at: ignore.expires_at,
        raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IgnoreType;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn restore_payload_uses_original_state() {
        let mut ignore = Ignore::new("p:SNYK-1:*", "org", "p", "SNYK-1", IgnoreType::WontFix, Utc::now());
        ignore.original_state = json!({"path": "*", "ignore": {"reason": "x"}}).to_string();
        let restored = restore_payload(&ignore);
        assert_eq!(restored.ignore_type, "wont-fix");
        assert_eq!(restored.raw["path"], "*");

        ignore.original_state = "not json".into();
        assert!(restore_payload(&ignore).raw.is_null());
    }
}
