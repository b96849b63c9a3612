//! Plan phase: one policy plan row per (org, asset key).
//!
//! Re-planning is a full replace: the org's policy rows are deleted and every
//! ignore's plan links cleared in one transaction before any group is planned.
//! Each group then runs in its own savepoint, so a failing group is skipped
//! without disturbing the others.

use super::{PhaseSummary, resolve};
use crate::error::{MigrateError, OptionExt, Result};
use crate::model::{Ignore, Policy};
use crate::storage::Ledger;
use crate::util::time::format_date;
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::{debug, info, warn};

/// Knobs for the plan phase.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanOptions {
    /// Roll back local migration bookkeeping of an already executed org
    /// instead of refusing to re-plan it.
    pub force: bool,
}

/// Generate a fresh internal policy id: `policy-` + 32 hex chars.
#[must_use]
pub fn generate_policy_id() -> String {
    let bytes: [u8; 16] = rand::random();
    let mut id = String::with_capacity(39);
    id.push_str("policy-");
    for byte in bytes {
        let _ = write!(id, "{byte:02x}");
    }
    id
}

/// Build the policy reason with the provenance of every source ignore.
///
/// The selected ignore is marked with `*`.
#[must_use]
pub fn build_reason(group: &[Ignore], selected: usize) -> String {
    let mut reason = String::new();
    if let Some(winner) = group.get(selected) {
        if winner.reason.trim().is_empty() {
            reason.push_str("Migrated legacy ignore");
        } else {
            reason.push_str(winner.reason.trim());
        }
    }
    let _ = write!(reason, " [migrated from {} legacy ignore(s):", group.len());
    for (idx, ignore) in group.iter().enumerate() {
        let marker = if idx == selected { "*" } else { "" };
        let _ = write!(
            reason,
            " {marker}{} ({}, {});",
            ignore.id,
            ignore.ignore_type,
            format_date(&ignore.created_at)
        );
    }
    if reason.ends_with(';') {
        reason.pop();
    }
    reason.push(']');
    reason
}

/// Plan one organization.
///
/// # Errors
///
/// Returns [`MigrateError::PlanBlocked`] when the org has executed policies and
/// `force` is off, or any error from the reset transaction.
pub fn plan_org(ledger: &mut Ledger, org: &str, options: PlanOptions) -> Result<PhaseSummary> {
    let executed = ledger
        .policies_by_org(org)?
        .iter()
        .filter(|policy| policy.is_executed())
        .count();
    if executed > 0 && !options.force {
        return Err(MigrateError::PlanBlocked {
            org: org.to_string(),
            executed,
        });
    }

    ledger.with_retry("plan.reset", |tx| {
        if executed > 0 {
            let counts = Ledger::rollback_org(tx, org)?;
            warn!(org, executed, ?counts, "Forced re-plan rolled back executed policies");
        }
        let deleted = Ledger::delete_policies_for_org(tx, org)?;
        let reset = Ledger::reset_plan_flags_for_org(tx, org)?;
        debug!(org, deleted, reset, "Plan reset");
        Ok(())
    })?;

    let mut groups: BTreeMap<String, Vec<Ignore>> = BTreeMap::new();
    for ignore in ledger.ignores_with_asset_key(org)? {
        groups.entry(ignore.asset_key.clone()).or_default().push(ignore);
    }
    let counts = ledger.org_counts(org)?;
    let unmapped = counts.ignores - counts.ignores_with_asset_key;

    let mut summary = ledger.with_retry("plan.groups", |tx| {
        let mut summary = PhaseSummary::new("plan", org);
        for (asset_key, group) in &groups {
            let savepoint = tx.savepoint()?;
            match plan_group(&savepoint, org, asset_key, group) {
                Ok(()) => {
                    savepoint.commit()?;
                    summary.record_success();
                    if group.len() > 1 {
                        summary.bump("conflicts", 1);
                    }
                }
                Err(error) => {
                    // Dropping the savepoint rolls the group back.
                    warn!(org, asset_key, %error, "Failed to plan group; skipping");
                    summary.record_failure();
                }
            }
        }
        Ok(summary)
    })?;
    summary.bump("unmapped", unmapped);

    info!(%summary, "Plan finished");
    Ok(summary)
}

fn plan_group(conn: &Connection, org: &str, asset_key: &str, group: &[Ignore]) -> Result<()> {
    let selected = resolve::select_index(group)
        .ok_or_migrate(|| MigrateError::validation("group", "empty asset group"))?;
    let winner = &group[selected];
    let internal_id = generate_policy_id();

    let policy = Policy {
        internal_id: internal_id.clone(),
        org_id: org.to_string(),
        asset_key: asset_key.to_string(),
        policy_type: winner.ignore_type.clone(),
        reason: build_reason(group, selected),
        expires_at: winner.expires_at,
        source_ignores: group.iter().map(|ignore| ignore.id.clone()).collect(),
        selected_ignore_id: winner.id.clone(),
        external_id: None,
        created_at: None,
    };
    Ledger::insert_or_update_policy_in_tx(conn, &policy)?;

    for (idx, ignore) in group.iter().enumerate() {
        Ledger::link_ignore_to_policy(conn, &ignore.id, &internal_id, idx == selected)?;
    }
    debug!(org, asset_key, %internal_id, selected = %winner.id, sources = group.len(), "Group planned");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IgnoreType;
    use chrono::{TimeZone, Utc};

    fn ignore(id: &str, kind: IgnoreType, y: i32, m: u32, d: u32, asset: &str) -> Ignore {
        let mut ignore = Ignore::new(
            id,
            "org-a",
            "proj",
            "SNYK-1",
            kind,
            Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap(),
        );
        ignore.asset_key = asset.to_string();
        ignore
    }

    #[test]
    fn policy_id_shape() {
        let id = generate_policy_id();
        assert_eq!(id.len(), 39);
        assert!(id.starts_with("policy-"));
        assert!(id[7..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_policy_id());
    }

    #[test]
    fn reason_lists_every_source_and_marks_winner() {
        let mut winner = ignore("i2", IgnoreType::WontFix, 2023, 6, 1, "A");
        winner.reason = "accepted by security".into();
        let group = vec![ignore("i1", IgnoreType::Temporary, 2023, 1, 1, "A"), winner];
        let reason = build_reason(&group, 1);
        assert_eq!(
            reason,
            "accepted by security [migrated from 2 legacy ignore(s): i1 (temporary, 2023-01-01); *i2 (wont-fix, 2023-06-01)]"
        );
    }

    #[test]
    fn plan_selects_priority_winner() {
        let mut ledger = Ledger::open_memory().unwrap();
        ledger
            .upsert_ignore(&ignore("i1", IgnoreType::Temporary, 2023, 1, 1, "A"))
            .unwrap();
        ledger
            .upsert_ignore(&ignore("i2", IgnoreType::WontFix, 2023, 6, 1, "A"))
            .unwrap();
        ledger
            .upsert_ignore(&ignore("i3", IgnoreType::Temporary, 2023, 1, 1, ""))
            .unwrap();

        let summary = plan_org(&mut ledger, "org-a", PlanOptions::default()).unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.detail("conflicts"), 1);
        assert_eq!(summary.detail("unmapped"), 1);

        let policies = ledger.policies_by_org("org-a").unwrap();
        assert_eq!(policies.len(), 1);
        let policy = &policies[0];
        assert_eq!(policy.policy_type, IgnoreType::WontFix);
        assert_eq!(policy.selected_ignore_id, "i2");
        assert_eq!(policy.source_ignores, vec!["i1", "i2"]);

        let i1 = ledger.get_ignore("i1").unwrap().unwrap();
        let i2 = ledger.get_ignore("i2").unwrap().unwrap();
        assert!(!i1.selected_for_migration);
        assert!(i2.selected_for_migration);
        assert_eq!(i1.internal_policy_id.as_deref(), Some(policy.internal_id.as_str()));
        assert_eq!(i2.internal_policy_id.as_deref(), Some(policy.internal_id.as_str()));
        assert!(ledger.get_ignore("i3").unwrap().unwrap().internal_policy_id.is_none());
    }

    #[test]
    fn replan_replaces_rows() {
        let mut ledger = Ledger::open_memory().unwrap();
        ledger
            .upsert_ignore(&ignore("i1", IgnoreType::Temporary, 2023, 1, 1, "A"))
            .unwrap();
        plan_org(&mut ledger, "org-a", PlanOptions::default()).unwrap();
        let first = ledger.policies_by_org("org-a").unwrap();
        plan_org(&mut ledger, "org-a", PlanOptions::default()).unwrap();
        let second = ledger.policies_by_org("org-a").unwrap();
        assert_eq!(second.len(), 1);
        assert_ne!(first[0].internal_id, second[0].internal_id);
        assert_eq!(
            ledger.get_ignore("i1").unwrap().unwrap().internal_policy_id,
            Some(second[0].internal_id.clone())
        );
    }

    #[test]
    fn executed_org_blocks_replan_unless_forced() {
        let mut ledger = Ledger::open_memory().unwrap();
        ledger
            .upsert_ignore(&ignore("i1", IgnoreType::Temporary, 2023, 1, 1, "A"))
            .unwrap();
        plan_org(&mut ledger, "org-a", PlanOptions::default()).unwrap();
        let policy = ledger.policies_by_org("org-a").unwrap().remove(0);
        ledger
            .with_retry("test", |tx| {
                Ledger::mark_policy_executed(tx, &policy.internal_id, "ext-1", Utc::now())
            })
            .unwrap();

        let blocked = plan_org(&mut ledger, "org-a", PlanOptions::default());
        assert!(matches!(blocked, Err(MigrateError::PlanBlocked { executed: 1, .. })));

        plan_org(&mut ledger, "org-a", PlanOptions { force: true }).unwrap();
        let i1 = ledger.get_ignore("i1").unwrap().unwrap();
        assert!(i1.migrated_at.is_none());
        assert!(i1.policy_id.is_none());
        assert!(i1.selected_for_migration);
    }
}
