use crate::migrate::PhaseSummary;
use crate::model::{Ignore, IgnoreState, Policy};
use serde::Serialize;

/// Ignore with its derived state, for `print`.
#[derive(Debug, Clone, Serialize)]
pub struct IgnoreView {
    #[serde(flatten)]
    pub ignore: Ignore,
    pub state: IgnoreState,
}

impl From<Ignore> for IgnoreView {
    fn from(ignore: Ignore) -> Self {
        let state = ignore.state();
        Self { ignore, state }
    }
}

/// Planned policy with its execution flag, for `print-plan`.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyView {
    #[serde(flatten)]
    pub policy: Policy,
    pub executed: bool,
    pub source_count: usize,
}

impl From<Policy> for PolicyView {
    fn from(policy: Policy) -> Self {
        Self {
            executed: policy.is_executed(),
            source_count: policy.source_ignores.len(),
            policy,
        }
    }
}

/// Per-organization summaries of one phase plus the totals across them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    pub phase: String,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: bool,
    pub organizations: Vec<PhaseSummary>,
}

impl PhaseReport {
    #[must_use]
    pub fn new(phase: &str, organizations: Vec<PhaseSummary>) -> Self {
        let mut report = Self {
            phase: phase.to_string(),
            ..Self::default()
        };
        for summary in &organizations {
            report.attempted += summary.attempted;
            report.succeeded += summary.succeeded;
            report.failed += summary.failed;
            report.timed_out |= summary.timed_out;
        }
        report.organizations = organizations;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IgnoreType;
    use chrono::{TimeZone, Utc};

    #[test]
    fn ignore_view_serializes_state() {
        let mut ignore = Ignore::new(
            "i1",
            "org",
            "proj",
            "SNYK-1",
            IgnoreType::Temporary,
            Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
        );
        ignore.asset_key = "A".into();
        let json = serde_json::to_string(&IgnoreView::from(ignore)).unwrap();
        assert!(json.contains("\"id\":\"i1\""));
        assert!(json.contains("\"state\":\"collected\""));
        assert!(json.contains("\"ignore_type\":\"temporary\""));
    }

    #[test]
    fn phase_report_totals() {
        let mut a = PhaseSummary::new("execute", "org-a");
        a.record_success();
        a.record_failure();
        let mut b = PhaseSummary::new("execute", "org-b");
        b.record_success();

        let report = PhaseReport::new("execute", vec![a, b]);
        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert!(!report.timed_out);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["organizations"][1]["org"], "org-b");
    }
}
