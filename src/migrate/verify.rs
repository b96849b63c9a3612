//! Read-only ledger consistency audit.

use crate::error::Result;
use crate::model::{Ignore, Policy};
use crate::storage::Ledger;
use serde::Serialize;
use std::collections::HashMap;

/// One broken invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub entity: &'static str,
    pub id: String,
    pub rule: &'static str,
    pub detail: String,
}

/// Audit result for one organization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub org: String,
    pub ignores_checked: usize,
    pub policies_checked: usize,
    pub violations: Vec<Violation>,
}

impl VerifyReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    fn push(&mut self, entity: &'static str, id: &str, rule: &'static str, detail: String) {
        self.violations.push(Violation {
            entity,
            id: id.to_string(),
            rule,
            detail,
        });
    }
}

/// Audit one organization.
///
/// # Errors
///
/// Returns an error if a ledger query fails.
pub fn verify_org(ledger: &Ledger, org: &str) -> Result<VerifyReport> {
    let ignores = ledger.ignores_by_org(org)?;
    let policies = ledger.policies_by_org(org)?;
    let mut report = VerifyReport {
        org: org.to_string(),
        ignores_checked: ignores.len(),
        policies_checked: policies.len(),
        violations: Vec::new(),
    };

    let by_id: HashMap<&str, &Ignore> = ignores.iter().map(|i| (i.id.as_str(), i)).collect();
    let policy_ids: HashMap<&str, &Policy> =
        policies.iter().map(|p| (p.internal_id.as_str(), p)).collect();

    for ignore in &ignores {
        check_ignore(&mut report, ignore, &policy_ids);
    }
    for policy in &policies {
        check_policy(&mut report, policy, &by_id);
    }
    Ok(report)
}

fn check_ignore(report: &mut VerifyReport, ignore: &Ignore, policies: &HashMap<&str, &Policy>) {
    let id = ignore.id.as_str();
    let linked = ignore.policy_id.is_some() && ignore.internal_policy_id.is_some();
    if ignore.migrated_at.is_some() != linked {
        report.push(
            "ignore",
            id,
            "migrated-iff-linked",
            "migrated_at must be set exactly when policy_id and internal_policy_id are".into(),
        );
    }
    if ignore.deleted_at.is_some() && ignore.migrated_at.is_none() {
        report.push("ignore", id, "deleted-after-migrated", "deleted before migration".into());
    }
    if ignore.selected_for_migration && ignore.internal_policy_id.is_none() {
        report.push("ignore", id, "selected-has-plan", "selected without a plan row".into());
    }
    if let Some(internal_id) = ignore.internal_policy_id.as_deref() {
        if !policies.contains_key(internal_id) {
            report.push(
                "ignore",
                id,
                "plan-row-exists",
                format!("links to missing policy {internal_id}"),
            );
        }
    }
    if serde_json::from_str::<serde_json::Value>(&ignore.original_state).is_err() {
        report.push(
            "ignore",
            id,
            "original-state-json",
            "original_state is not valid JSON".into(),
        );
    }
}

fn check_policy(report: &mut VerifyReport, policy: &Policy, ignores: &HashMap<&str, &Ignore>) {
    let id = policy.internal_id.as_str();
    if policy.source_ignores.is_empty() {
        report.push("policy", id, "has-sources", "no source ignores".into());
    }
    if !policy.source_ignores.contains(&policy.selected_ignore_id) {
        report.push(
            "policy",
            id,
            "selected-is-source",
            format!("selected {} is not a source", policy.selected_ignore_id),
        );
    }

    let mut selected = 0;
    for source in &policy.source_ignores {
        let Some(ignore) = ignores.get(source.as_str()) else {
            report.push("policy", id, "source-exists", format!("source {source} missing"));
            continue;
        };
        if ignore.internal_policy_id.as_deref() != Some(id) {
            report.push("policy", id, "source-linked", format!("source {source} not linked back"));
        }
        if ignore.asset_key != policy.asset_key {
            report.push(
                "policy",
                id,
                "source-asset-key",
                format!("source {source} has asset key '{}'", ignore.asset_key),
            );
        }
        if ignore.selected_for_migration {
            selected += 1;
        }
        if policy.is_executed() != ignore.migrated_at.is_some() {
            report.push(
                "policy",
                id,
                "executed-iff-migrated",
                format!("source {source} migration state disagrees with policy"),
            );
        }
    }
    if selected != 1 {
        report.push(
            "policy",
            id,
            "one-selected",
            format!("{selected} selected sources, expected 1"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::plan::{PlanOptions, plan_org};
    use crate::model::IgnoreType;
    use chrono::{TimeZone, Utc};

    fn seed(ledger: &mut Ledger) {
        for (id, kind) in [("i1", IgnoreType::Temporary), ("i2", IgnoreType::WontFix)] {
            let mut ignore = Ignore::new(
                id,
                "org-a",
                "proj",
                "SNYK-1",
                kind,
                Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            );
            ignore.asset_key = "A".into();
            ledger.upsert_ignore(&ignore).unwrap();
        }
    }

    #[test]
    fn planned_ledger_is_clean() {
        let mut ledger = Ledger::open_memory().unwrap();
        seed(&mut ledger);
        plan_org(&mut ledger, "org-a", PlanOptions::default()).unwrap();
        let report = verify_org(&ledger, "org-a").unwrap();
        assert!(report.is_clean(), "{:?}", report.violations);
        assert_eq!(report.ignores_checked, 2);
        assert_eq!(report.policies_checked, 1);
    }

    #[test]
    fn dangling_link_is_reported() {
        let mut ledger = Ledger::open_memory().unwrap();
        seed(&mut ledger);
        ledger
            .execute_sql(
                "UPDATE ignores SET internal_policy_id = 'policy-gone', selected_for_migration = 1
                 WHERE id = 'i1'",
                &[],
            )
            .unwrap();
        let report = verify_org(&ledger, "org-a").unwrap();
        assert!(!report.is_clean());
        assert!(report.violations.iter().any(|v| v.rule == "plan-row-exists"));
    }

    #[test]
    fn half_migrated_ignore_is_reported() {
        let mut ledger = Ledger::open_memory().unwrap();
        seed(&mut ledger);
        ledger
            .execute_sql(
                "UPDATE ignores SET migrated_at = '2024-01-01T00:00:00Z' WHERE id = 'i2'",
                &[],
            )
            .unwrap();
        let report = verify_org(&ledger, "org-a").unwrap();
        assert!(report.violations.iter().any(|v| v.rule == "migrated-iff-linked"));
    }
}
