mod common;

use common::cli::{IgmWorkspace, extract_json_payload, run_igm, run_igm_with_env};
use common::fixtures::{day, ignore};
use common::test_log;
use ignore_migrate::model::{Ignore, IgnoreType};
use ignore_migrate::storage::Ledger;
use predicates::prelude::*;
use serde_json::Value;

fn seed_ledger(workspace: &IgmWorkspace) {
    let mut ledger = Ledger::open(&workspace.ledger_path()).unwrap();
    for (id, kind, month) in [("i1", IgnoreType::Temporary, 1), ("i2", IgnoreType::WontFix, 6)] {
        let remote = ignore(id, "SNYK-1", kind.as_str(), day(2023, month, 1));
        let mut row = Ignore::new(id, "org-a", "p1", "SNYK-1", kind, remote.created_at);
        row.asset_key = "A".to_string();
        row.reason = remote.reason.clone();
        row.original_state = remote.raw.to_string();
        ledger.upsert_ignore(&row).unwrap();
    }
}

#[test]
fn status_on_empty_org_is_not_started() {
    let _log = test_log("status_on_empty_org_is_not_started");
    let workspace = IgmWorkspace::initialized();

    let run = run_igm(&workspace, ["status", "--org", "org-x"], "status_empty");
    assert!(run.status.success(), "stderr: {}", run.stderr);
    assert!(run.stdout.contains("Organization org-x: NOT STARTED"), "{}", run.stdout);
    assert!(run.stdout.contains("0 ignore(s)"));
}

#[test]
fn status_json_reports_counts() {
    let _log = test_log("status_json_reports_counts");
    let workspace = IgmWorkspace::initialized();
    seed_ledger(&workspace);

    let run = run_igm(&workspace, ["--json", "status", "--org", "org-a"], "status_json");
    assert!(run.status.success(), "stderr: {}", run.stderr);
    let payload: Value = serde_json::from_str(&extract_json_payload(&run.stdout)).unwrap();
    let status = &payload[0];
    assert_eq!(status["org"], "org-a");
    assert_eq!(status["label"], "GATHERED");
    assert_eq!(status["counts"]["ignores"], 2);
    assert_eq!(status["mapped"]["done"], 2);
}

#[test]
fn plan_then_print_plan_as_csv() {
    let _log = test_log("plan_then_print_plan_as_csv");
    let workspace = IgmWorkspace::initialized();
    seed_ledger(&workspace);

    let plan = run_igm(&workspace, ["plan", "--org", "org-a"], "plan");
    assert!(plan.status.success(), "stderr: {}", plan.stderr);
    assert!(plan.stdout.contains("plan [org-a]"), "{}", plan.stdout);

    let csv = run_igm(
        &workspace,
        ["print-plan", "--org", "org-a", "--format", "csv"],
        "print_plan_csv",
    );
    assert!(csv.status.success(), "stderr: {}", csv.stderr);
    let mut lines = csv.stdout.lines();
    assert!(lines.next().unwrap().starts_with("internal_id,org_id,asset_key"));
    let row = lines.next().unwrap();
    assert!(row.contains(",org-a,A,wont-fix,i2,i1;i2,"), "{row}");
    assert!(lines.next().is_none());

    let verify = run_igm(&workspace, ["verify", "--org", "org-a"], "verify");
    assert!(verify.status.success(), "stdout: {}", verify.stdout);
    assert!(verify.stdout.contains("0 violation(s)"));
}

#[test]
fn print_filters_by_state() {
    let _log = test_log("print_filters_by_state");
    let workspace = IgmWorkspace::initialized();
    seed_ledger(&workspace);
    run_igm(&workspace, ["plan", "--org", "org-a"], "plan");

    let run = run_igm(
        &workspace,
        ["--json", "print", "--org", "org-a", "--state", "selected"],
        "print_selected",
    );
    assert!(run.status.success(), "stderr: {}", run.stderr);
    let payload: Value = serde_json::from_str(&extract_json_payload(&run.stdout)).unwrap();
    let rows = payload.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], "i2");
    assert_eq!(rows[0]["state"], "selected");
}

#[test]
fn gather_without_token_fails() {
    let _log = test_log("gather_without_token_fails");
    let workspace = IgmWorkspace::new();

    let run = run_igm(&workspace, ["gather", "--org", "org-a"], "gather_no_token");
    assert!(!run.status.success());
    assert_eq!(run.status.code(), Some(7));
    assert!(run.stderr.contains("MISSING_CREDENTIAL"), "{}", run.stderr);
    assert!(workspace.root.join(".igm").is_dir());
}

#[test]
fn status_outside_workspace_is_not_initialized() {
    let _log = test_log("status_outside_workspace_is_not_initialized");
    let workspace = IgmWorkspace::new();

    let run = run_igm(&workspace, ["status", "--org", "org-a"], "status_uninit");
    assert_eq!(run.status.code(), Some(2));
    assert!(run.stderr.contains("NOT_INITIALIZED"), "{}", run.stderr);
}

#[test]
fn workspace_dir_from_env() {
    let _log = test_log("workspace_dir_from_env");
    let workspace = IgmWorkspace::new();
    let dir = workspace.root.join("elsewhere");
    std::fs::create_dir_all(&dir).unwrap();

    let run = run_igm_with_env(
        &workspace,
        ["status", "--org", "org-a"],
        [("IGM_DIR", dir.to_string_lossy().to_string())],
        "status_igm_dir",
    );
    assert!(run.status.success(), "stderr: {}", run.stderr);
    assert!(dir.join("ledger.db").exists());
}

#[test]
fn org_and_group_are_exclusive() {
    let _log = test_log("org_and_group_are_exclusive");
    let workspace = IgmWorkspace::initialized();

    let run = run_igm(
        &workspace,
        ["status", "--org", "a", "--group", "g"],
        "scope_conflict",
    );
    assert!(!run.status.success());
    assert!(run.stderr.contains("cannot be used with"), "{}", run.stderr);
}

#[test]
fn backup_then_restore_round_trip() {
    let _log = test_log("backup_then_restore_round_trip");
    let workspace = IgmWorkspace::initialized();
    seed_ledger(&workspace);

    let backup = run_igm(&workspace, ["backup"], "backup");
    assert!(backup.status.success(), "stderr: {}", backup.stderr);

    run_igm(&workspace, ["plan", "--org", "org-a"], "plan");
    let restore = run_igm(&workspace, ["restore"], "restore");
    assert!(restore.status.success(), "stderr: {}", restore.stderr);

    let ledger = Ledger::open(&workspace.ledger_path()).unwrap();
    assert!(ledger.policies_by_org("org-a").unwrap().is_empty());
    assert_eq!(ledger.ignores_by_org("org-a").unwrap().len(), 2);
}

#[test]
fn help_lists_every_phase() {
    let _log = test_log("help_lists_every_phase");
    let mut cmd = assert_cmd::Command::new(assert_cmd::cargo::cargo_bin!("igm"));
    let mut assert = cmd.arg("--help").assert().success();
    for phase in ["gather", "plan", "execute", "retest", "cleanup", "rollback", "status"] {
        assert = assert.stdout(predicate::str::contains(phase));
    }
}
