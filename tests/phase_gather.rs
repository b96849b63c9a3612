mod common;

use common::fixtures::{cli_project, day, finding, ignore, org, project};
use common::{FakeGateway, test_ledger, test_log};
use ignore_migrate::error::MigrateError;
use ignore_migrate::migrate::Deadline;
use ignore_migrate::migrate::Scope;
use ignore_migrate::migrate::execute::{ExecuteOptions, execute_org};
use ignore_migrate::migrate::gather::{CollectionSettings, Gatherer};
use ignore_migrate::migrate::plan::{PlanOptions, plan_org};
use ignore_migrate::storage::Ledger;

fn settings() -> CollectionSettings {
    CollectionSettings {
        collection_version: "1".to_string(),
        api_version: "2024-10-15".to_string(),
    }
}

fn fixture_gateway() -> FakeGateway {
    FakeGateway::new()
        .with_project("org-a", project("p1"))
        .with_project("org-a", cli_project("p2"))
        .with_ignore("p1", ignore("i2", "SNYK-1", "wont-fix", day(2023, 6, 1)))
        .with_ignore("p1", ignore("i1", "SNYK-1", "temporary", day(2023, 1, 1)))
        .with_ignore("p2", ignore("i3", "SNYK-2", "not-vulnerable", day(2023, 2, 1)))
        .with_ignore("p2", ignore("i4", "SNYK-9", "temporary", day(2023, 3, 1)))
        .with_finding("org-a", finding("f1", "p1", "A", "SNYK-1"))
        .with_finding("org-a", finding("f2", "p2", "B", "SNYK-2"))
        // Same project key in another project must not leak across.
        .with_finding("org-a", finding("f3", "p2", "C", "SNYK-1"))
}

fn gather(ledger: &mut Ledger, gateway: &FakeGateway) {
    Gatherer::new(gateway, settings())
        .run(ledger, &Scope::Org("org-a".to_string()))
        .unwrap();
}

#[test]
fn gather_populates_ledger_and_correlates_assets() {
    let _log = test_log("gather_populates_ledger_and_correlates_assets");
    let mut ledger = test_ledger();
    let gateway = fixture_gateway();

    let summaries = Gatherer::new(&gateway, settings())
        .run(&mut ledger, &Scope::Org("org-a".to_string()))
        .unwrap();
    assert_eq!(summaries.len(), 1);
    let summary = &summaries[0];
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.detail("ignores"), 4);
    assert_eq!(summary.detail("inserted"), 4);
    assert_eq!(summary.detail("findings"), 3);

    let counts = ledger.org_counts("org-a").unwrap();
    assert_eq!(counts.ignores, 4);
    assert_eq!(counts.ignores_with_asset_key, 3);
    assert_eq!(counts.projects, 2);
    assert_eq!(counts.cli_projects, 1);

    assert_eq!(ledger.get_ignore("i1").unwrap().unwrap().asset_key, "A");
    assert_eq!(ledger.get_ignore("i3").unwrap().unwrap().asset_key, "B");
    assert!(ledger.get_ignore("i4").unwrap().unwrap().asset_key.is_empty());

    let meta = ledger.get_collection_metadata().unwrap().unwrap();
    assert_eq!(meta.collection_version, "1");
    assert_eq!(meta.api_version, "2024-10-15");
}

#[test]
fn gather_is_idempotent() {
    let _log = test_log("gather_is_idempotent");
    let mut ledger = test_ledger();
    let gateway = fixture_gateway();

    gather(&mut ledger, &gateway);
    let first_counts = ledger.org_counts("org-a").unwrap();
    let first: Vec<_> = ledger
        .ignores_by_org("org-a")
        .unwrap()
        .into_iter()
        .map(|i| (i.id, i.asset_key, i.content_hash, i.original_state))
        .collect();

    let summaries = Gatherer::new(&gateway, settings())
        .run(&mut ledger, &Scope::Org("org-a".to_string()))
        .unwrap();
    assert_eq!(summaries[0].detail("unchanged"), 4);
    assert_eq!(summaries[0].detail("inserted"), 0);

    let second: Vec<_> = ledger
        .ignores_by_org("org-a")
        .unwrap()
        .into_iter()
        .map(|i| (i.id, i.asset_key, i.content_hash, i.original_state))
        .collect();
    assert_eq!(first, second);
    assert_eq!(first_counts, ledger.org_counts("org-a").unwrap());
}

#[test]
fn regather_after_migration_never_regresses() {
    let _log = test_log("regather_after_migration_never_regresses");
    let mut ledger = test_ledger();
    let gateway = fixture_gateway();
    gather(&mut ledger, &gateway);
    plan_org(&mut ledger, "org-a", PlanOptions::default()).unwrap();
    execute_org(
        &mut ledger,
        &gateway,
        "org-a",
        ExecuteOptions::default(),
        &Deadline::unbounded(),
    )
    .unwrap();

    let before = ledger.get_ignore("i2").unwrap().unwrap();
    assert!(before.is_migrated());

    // The source payload changes remotely after migration.
    let mut changed = ignore("i2", "SNYK-1", "wont-fix", day(2023, 6, 1));
    changed.raw["reason"] = serde_json::json!("edited after migration");
    changed.reason = "edited after migration".to_string();
    gateway.set_ignores(
        "p1",
        vec![changed, ignore("i1", "SNYK-1", "temporary", day(2023, 1, 1))],
    );

    let summaries = Gatherer::new(&gateway, settings())
        .run(&mut ledger, &Scope::Org("org-a".to_string()))
        .unwrap();
    assert_eq!(summaries[0].detail("drifted"), 1);

    let after = ledger.get_ignore("i2").unwrap().unwrap();
    assert_eq!(after.migrated_at, before.migrated_at);
    assert_eq!(after.policy_id, before.policy_id);
    assert_eq!(after.internal_policy_id, before.internal_policy_id);
    assert!(after.selected_for_migration);
    assert_eq!(after.asset_key, "A");
    assert_eq!(after.original_state, before.original_state);
    assert_ne!(after.content_hash, before.content_hash);
}

#[test]
fn failed_ignore_listing_skips_project() {
    let _log = test_log("failed_ignore_listing_skips_project");
    let mut ledger = test_ledger();
    let mut gateway = fixture_gateway();
    gateway.fail_ignore_listing.insert("p2".to_string());

    let summaries = Gatherer::new(&gateway, settings())
        .run(&mut ledger, &Scope::Org("org-a".to_string()))
        .unwrap();
    assert_eq!(summaries[0].succeeded, 1);
    assert_eq!(summaries[0].failed, 1);
    assert_eq!(ledger.org_counts("org-a").unwrap().ignores, 2);
}

#[test]
fn failed_project_listing_is_fatal() {
    let _log = test_log("failed_project_listing_is_fatal");
    let mut ledger = test_ledger();
    let mut gateway = fixture_gateway();
    gateway.fail_projects = true;

    let err = Gatherer::new(&gateway, settings())
        .run(&mut ledger, &Scope::Org("org-a".to_string()))
        .unwrap_err();
    assert!(matches!(err, MigrateError::RemoteListing { .. }));
}

#[test]
fn group_scope_gathers_every_org() {
    let _log = test_log("group_scope_gathers_every_org");
    let mut ledger = test_ledger();
    let gateway = fixture_gateway()
        .with_group("g1", org("org-a", "g1"))
        .with_group("g1", org("org-b", "g1"))
        .with_project("org-b", project("pb"))
        .with_ignore("pb", ignore("ib", "SNYK-1", "temporary", day(2024, 1, 1)));

    let summaries = Gatherer::new(&gateway, settings())
        .run(&mut ledger, &Scope::Group("g1".to_string()))
        .unwrap();
    assert_eq!(summaries.len(), 2);

    let local = Scope::Group("g1".to_string()).resolve_local(&ledger).unwrap();
    assert_eq!(local, vec!["org-a".to_string(), "org-b".to_string()]);
    assert_eq!(ledger.org_counts("org-b").unwrap().ignores, 1);
}

#[test]
fn empty_group_is_an_error() {
    let _log = test_log("empty_group_is_an_error");
    let mut ledger = test_ledger();
    let gateway = FakeGateway::new();
    let err = Gatherer::new(&gateway, settings())
        .run(&mut ledger, &Scope::Group("nobody".to_string()))
        .unwrap_err();
    assert!(matches!(err, MigrateError::NoOrganizations { .. }));
}
