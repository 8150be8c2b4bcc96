mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeHosting, World, clean_report, lodash_report, repo};
use depfix::config::{AuditConfig, PushStrategy};
use depfix::fleet::{FleetAuditor, FleetOptions, RepoOutcome};
use depfix::hosting::RepositoryHandle;
use depfix::store::{AuditState, StateStore};
use depfix::triggers::command::run_audit;
use depfix::triggers::schedule::{DEFAULT_MIN_INTERVAL, on_schedule};

fn repos(n: usize) -> Vec<RepositoryHandle> {
    (1..=n).map(|i| repo(&format!("r{i:02}"), "acme", &format!("svc-{i:02}"))).collect()
}

fn config() -> Arc<AuditConfig> {
    Arc::new(AuditConfig::named("fleet"))
}

#[tokio::test]
async fn cycle_processes_least_recently_processed_up_to_cap() {
    let world = World::new(FakeHosting::with_repos(repos(30)));
    let mut state = AuditState::new();
    for i in 1..=30 {
        state.record(&format!("r{i:02}"), i as i64, false);
    }
    world.store.save("fleet", &state).await.unwrap();

    let options = FleetOptions {
        max_repositories: 25,
        max_concurrency: 1,
        ..FleetOptions::default()
    };
    let report = FleetAuditor::new(world.services(), config(), options).run().await.unwrap();
    assert_eq!(report.results.len(), 25);
    assert_eq!(report.status.message, "Audited 25 repositories, remediation triggered on 25");

    let state = world.store.load("fleet").await.unwrap();
    for i in 1..=25 {
        assert!(state.processed(&format!("r{i:02}")) > 1_000, "r{i:02} should be refreshed");
    }
    for i in 26..=30 {
        assert_eq!(state.processed(&format!("r{i:02}")), i as i64, "r{i:02} should be untouched");
    }
}

#[tokio::test]
async fn unreadable_repository_is_excluded_without_stopping_the_batch() {
    let mut hosting = FakeHosting::with_repos(repos(3));
    hosting.unreadable.insert("r02".into());
    let world = World::new(hosting);

    let report = FleetAuditor::new(world.services(), config(), FleetOptions::default())
        .run()
        .await
        .unwrap();
    assert_eq!(report.results.len(), 3);
    let by_id = |id: &str| report.results.iter().find(|r| r.repo_id == id).unwrap().outcome.clone();
    assert!(matches!(by_id("r02"), RepoOutcome::Excluded { .. }));
    assert!(matches!(by_id("r01"), RepoOutcome::Triggered { .. }));
    assert!(matches!(by_id("r03"), RepoOutcome::Triggered { .. }));

    let state = world.store.load("fleet").await.unwrap();
    assert!(state.is_excluded("r02"));
    assert!(!state.is_excluded("r01"));

    world.hosting.calls.lock().unwrap().clear();
    let next = FleetAuditor::new(world.services(), config(), FleetOptions::default())
        .run()
        .await
        .unwrap();
    assert_eq!(next.results.len(), 2);
    assert!(next.results.iter().all(|r| r.repo_id != "r02"));
    assert!(world.hosting.calls_starting_with("file:acme/svc-02").is_empty());
}

#[tokio::test]
async fn unchanged_registry_report_skips_the_pipeline() {
    let world = World::new(FakeHosting::with_repos(repos(1)));
    world.oracle.set_report(&lodash_report(false, "registry-1"));

    let first = run_audit(world.services(), config(), None, None).await.unwrap();
    assert!(matches!(first.results[0].outcome, RepoOutcome::Triggered { .. }));
    let clones = world.checkouts.clones.lock().unwrap().len();

    world.oracle.set_report(&lodash_report(false, "registry-2"));
    let second = run_audit(world.services(), config(), None, None).await.unwrap();
    assert_eq!(second.results[0].outcome, RepoOutcome::Unchanged);
    assert_eq!(world.checkouts.clones.lock().unwrap().len(), clones);
    assert_eq!(second.status.message, "Audited 1 repository, remediation triggered on 0");
}

#[tokio::test]
async fn failed_remediation_is_retried_next_cycle() {
    let world = World::new(FakeHosting::with_repos(repos(1)));
    world.oracle.set_report(&lodash_report(false, "registry-1"));
    world.npm.set_audits(vec![
        lodash_report(false, "run-1"),
        lodash_report(false, "run-1"),
        clean_report(),
    ]);
    world.npm.fail("install");

    let first = run_audit(world.services(), config(), None, None).await.unwrap();
    match &first.results[0].outcome {
        RepoOutcome::Triggered { status } => assert!(!status.is_success()),
        other => panic!("unexpected outcome {other:?}"),
    }

    world.npm.failing.lock().unwrap().clear();
    let second = run_audit(world.services(), config(), None, None).await.unwrap();
    match &second.results[0].outcome {
        RepoOutcome::Triggered { status } => assert!(status.is_success(), "{status}"),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(world.hosting.pull_requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn disabled_push_strategy_is_a_quiet_no_op() {
    let world = World::new(FakeHosting::with_repos(repos(2)));
    let mut cfg = AuditConfig::named("fleet");
    cfg.push = PushStrategy::None;

    let report = FleetAuditor::new(world.services(), Arc::new(cfg), FleetOptions::default())
        .run()
        .await
        .unwrap();
    assert!(report.status.hidden);
    assert_eq!(report.status.message, "Push strategy disabled");
    assert!(world.oracle.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn command_audit_filters_by_owner_and_repo() {
    let mut all = repos(2);
    all.push(repo("x1", "other", "svc-01"));
    let world = World::new(FakeHosting::with_repos(all));

    let report = run_audit(world.services(), config(), Some("other".into()), None).await.unwrap();
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].repo, "other/svc-01");

    let report = run_audit(world.services(), config(), None, Some("acme/svc-02".into()))
        .await
        .unwrap();
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].repo_id, "r02");
}

#[tokio::test]
async fn schedule_respects_idle_window() {
    let world = World::new(FakeHosting::with_repos(repos(1)));

    let first = on_schedule(world.services(), config(), FleetOptions::default(), DEFAULT_MIN_INTERVAL)
        .await
        .unwrap();
    assert_eq!(first.results.len(), 1);
    assert!(world.store.load("fleet").await.unwrap().last_cycle.is_some());

    let second = on_schedule(world.services(), config(), FleetOptions::default(), DEFAULT_MIN_INTERVAL)
        .await
        .unwrap();
    assert!(second.status.hidden);
    assert_eq!(second.status.message, "Not passed the required idle time");
    assert!(second.results.is_empty());

    let third = on_schedule(world.services(), config(), FleetOptions::default(), Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(third.results.len(), 1);
}
