mod common;

use std::sync::Arc;

use serde_json::json;

use common::{FakeHosting, World, clean_report, lodash_report, push_event, repo};
use depfix::config::{AuditConfig, PushStrategy};
use depfix::fingerprint::{AUDIT_REPORT_KIND, DEPENDENCY_KIND};
use depfix::hosting::CheckConclusion;
use depfix::pipeline::Terminal;
use depfix::status::Outcome;
use depfix::store::FingerprintStore;
use depfix::triggers::push::on_push;

fn config(push: PushStrategy) -> Arc<AuditConfig> {
    let mut config = AuditConfig::named("acme");
    config.push = push;
    Arc::new(config)
}

fn world() -> World {
    World::new(FakeHosting::with_repos(vec![repo("1", "acme", "web")]))
}

#[tokio::test]
async fn clean_repository_reports_success_without_remediation() {
    let world = world();
    world.npm.set_audits(vec![clean_report()]);

    let report = on_push(
        world.services(),
        config(PushStrategy::PullRequest),
        push_event(repo("1", "acme", "web"), "main"),
        false,
    )
    .await;

    assert_eq!(report.terminal, Terminal::Done);
    assert_eq!(report.status.outcome, Outcome::Success);
    assert!(report.status.message.contains("found no security vulnerabilities"));
    for stage in ["install", "fix", "push-pr", "push-update-pr"] {
        assert!(!report.ran(stage), "{stage} should not run");
    }
    let updates = world.hosting.check_updates.lock().unwrap();
    assert_eq!(updates.last().map(|u| u.conclusion), Some(CheckConclusion::Success));
    assert!(world.hosting.pull_requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn major_only_fix_is_withheld_and_stale_pull_request_closed() {
    let world = world();
    world.npm.set_audits(vec![lodash_report(true, "run-1")]);
    world.hosting.open_heads.lock().unwrap().push("remediation/main".into());

    let report = on_push(
        world.services(),
        config(PushStrategy::PullRequest),
        push_event(repo("1", "acme", "web"), "main"),
        false,
    )
    .await;

    assert_eq!(report.terminal, Terminal::Done);
    assert!(!report.ran("install"));
    assert!(!report.ran("fix"));
    assert!(!report.ran("push-pr"));
    assert!(report.ran("close-pr"));
    assert_eq!(world.hosting.calls_starting_with("close_pr:remediation/main").len(), 1);
    assert!(world.hosting.open_heads.lock().unwrap().is_empty());

    let updates = world.hosting.check_updates.lock().unwrap();
    assert_eq!(updates.last().map(|u| u.conclusion), Some(CheckConclusion::ActionRequired));
    assert!(report.status.message.contains("1 moderate"));
}

#[tokio::test]
async fn fixable_advisory_opens_pull_request_listing_the_fix() {
    let world = world();
    world.npm.set_audits(vec![lodash_report(false, "run-1"), clean_report()]);

    let report = on_push(
        world.services(),
        config(PushStrategy::PullRequest),
        push_event(repo("1", "acme", "web"), "main"),
        false,
    )
    .await;

    assert_eq!(report.terminal, Terminal::Done, "{}", report.status);
    for stage in ["install", "fix", "push-pr"] {
        assert!(report.ran(stage), "{stage} should run");
    }
    assert!(!report.ran("close-pr"));

    let commands = world.npm.commands();
    assert!(commands.iter().any(|c| c.starts_with("ci ")));
    assert!(commands.iter().any(|c| c.starts_with("install lodash@4.17.21 --save-exact")));

    let prs = world.hosting.pull_requests.lock().unwrap();
    assert_eq!(prs.len(), 1);
    assert_eq!(prs[0].head, "remediation/main");
    assert_eq!(prs[0].base, "main");
    assert!(prs[0].body.contains("Fixed vulnerabilities"));
    assert!(prs[0].body.contains("### lodash"));
    assert!(prs[0].body.contains(" * `lodash` > _4.17.21_"));
    assert!(!prs[0].body.contains("Open vulnerabilities"));

    assert_eq!(world.checkouts.pushes(), vec!["remediation/main: npm audit fixes"]);
    assert_eq!(
        report.status.message,
        "Opened pull request [acme/web#1](https://github.com/acme/web/pull/1)"
    );
}

#[tokio::test]
async fn rerun_over_unchanged_state_opens_nothing_new() {
    let world = world();
    world
        .npm
        .set_audits(vec![lodash_report(false, "run-1"), clean_report(), lodash_report(false, "run-2")]);
    let event = push_event(repo("1", "acme", "web"), "main");

    let first = on_push(world.services(), config(PushStrategy::PullRequest), event.clone(), false).await;
    assert!(first.ran("push-pr"));
    let fingerprint = world.store.latest("1", "main", AUDIT_REPORT_KIND).await.unwrap().unwrap();

    let second = on_push(world.services(), config(PushStrategy::PullRequest), event, false).await;
    let again = world.store.latest("1", "main", AUDIT_REPORT_KIND).await.unwrap().unwrap();
    assert_eq!(fingerprint.sha, again.sha);
    assert!(!second.ran("install"));
    assert!(!second.ran("push-pr"));
    assert_eq!(world.hosting.pull_requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn audit_records_dependency_fingerprints_on_default_branch() {
    let world = world();
    on_push(
        world.services(),
        config(PushStrategy::None),
        push_event(repo("1", "acme", "web"), "main"),
        false,
    )
    .await;

    let heads = world.store.head_fingerprints(DEPENDENCY_KIND, Some("lodash")).await.unwrap();
    assert_eq!(heads.len(), 1);
    assert_eq!(heads[0].fingerprints[0].sha, depfix::fingerprint::hash("^4.17.15").unwrap());
}

#[tokio::test]
async fn generated_branch_aborts_quietly() {
    let world = world();
    let report = on_push(
        world.services(),
        config(PushStrategy::PullRequest),
        push_event(repo("1", "acme", "web"), "remediation/main"),
        false,
    )
    .await;

    assert_eq!(report.terminal, Terminal::Aborted);
    assert!(report.status.hidden);
    assert_eq!(report.executed, vec!["setup"]);
    assert!(world.checkouts.clones.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failed_fix_halts_before_push() {
    let world = world();
    world.npm.set_audits(vec![lodash_report(false, "run-1")]);
    world.npm.fail("install");

    let report = on_push(
        world.services(),
        config(PushStrategy::PullRequest),
        push_event(repo("1", "acme", "web"), "main"),
        false,
    )
    .await;

    assert_eq!(report.terminal, Terminal::Failed);
    assert_eq!(report.status.message, "`npm audit fix` failed on lodash");
    assert_eq!(report.executed.last(), Some(&"fix"));
    assert!(world.hosting.pull_requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failed_remediation_is_retried_on_next_push() {
    let world = world();
    world.npm.set_audits(vec![
        lodash_report(false, "run-1"),
        lodash_report(false, "run-1"),
        clean_report(),
    ]);
    world.npm.fail("install");
    let event = push_event(repo("1", "acme", "web"), "main");

    let first = on_push(world.services(), config(PushStrategy::PullRequest), event.clone(), false).await;
    assert_eq!(first.terminal, Terminal::Failed);
    assert!(world.store.latest("1", "main", AUDIT_REPORT_KIND).await.unwrap().is_none());

    world.npm.failing.lock().unwrap().clear();
    let second = on_push(world.services(), config(PushStrategy::PullRequest), event, false).await;
    assert_eq!(second.terminal, Terminal::Done, "{}", second.status);
    assert!(second.ran("fix"));
    assert!(second.ran("push-pr"));
    assert_eq!(world.hosting.pull_requests.lock().unwrap().len(), 1);
    assert!(world.store.latest("1", "main", AUDIT_REPORT_KIND).await.unwrap().is_some());
}

#[tokio::test]
async fn update_track_runs_when_security_push_is_disabled() {
    let world = world();
    world.npm.set_audits(vec![lodash_report(false, "run-1")]);
    world.npm.set_outdated(json!({
        "lodash": {"current": "4.17.15", "wanted": "4.17.21", "latest": "4.17.21"}
    }));
    let mut cfg = AuditConfig::named("acme");
    cfg.push = PushStrategy::None;
    cfg.update_push = PushStrategy::PullRequest;

    let report = on_push(
        world.services(),
        Arc::new(cfg),
        push_event(repo("1", "acme", "web"), "main"),
        false,
    )
    .await;

    assert_eq!(report.terminal, Terminal::Done, "{}", report.status);
    assert!(!report.ran("fix"));
    assert!(report.ran("update-outdated"));
    assert!(report.ran("push-update-pr"));
    let prs = world.hosting.pull_requests.lock().unwrap();
    assert_eq!(prs.len(), 1);
    assert_eq!(prs[0].head, "remediation-update/main");
}

#[tokio::test]
async fn update_track_runs_when_audit_is_clean() {
    let world = world();
    world.npm.set_audits(vec![clean_report()]);
    world.npm.set_outdated(json!({
        "lodash": {"current": "4.17.15", "wanted": "4.17.21", "latest": "4.17.21"},
        "jest": {"current": "26.6.3", "wanted": "26.6.3", "latest": "29.7.0"}
    }));
    let mut cfg = AuditConfig::named("acme");
    cfg.push = PushStrategy::PullRequest;
    cfg.update_push = PushStrategy::PullRequest;

    let report = on_push(
        world.services(),
        Arc::new(cfg),
        push_event(repo("1", "acme", "web"), "main"),
        false,
    )
    .await;

    assert!(report.ran("update-outdated"));
    assert!(report.ran("push-update-pr"));
    assert!(world.npm.commands().iter().any(|c| c.starts_with("update --save lodash")));
    let prs = world.hosting.pull_requests.lock().unwrap();
    assert_eq!(prs.len(), 1);
    assert_eq!(prs[0].head, "remediation-update/main");
    assert!(prs[0].body.contains("### Dependencies"));
    assert!(!prs[0].body.contains("jest"));
}

#[tokio::test]
async fn security_actions_suppress_update_track() {
    let world = world();
    world.npm.set_audits(vec![lodash_report(false, "run-1"), clean_report()]);
    world.npm.set_outdated(json!({
        "lodash": {"current": "4.17.15", "wanted": "4.17.21", "latest": "4.17.21"}
    }));
    let mut cfg = AuditConfig::named("acme");
    cfg.push = PushStrategy::PullRequest;
    cfg.update_push = PushStrategy::PullRequest;

    let report = on_push(
        world.services(),
        Arc::new(cfg),
        push_event(repo("1", "acme", "web"), "main"),
        false,
    )
    .await;

    assert!(report.ran("push-pr"));
    assert!(!report.ran("update-outdated"));
    assert!(!report.ran("push-update-pr"));
}

#[tokio::test]
async fn project_without_lock_file_is_ignored() {
    let world = world();
    world
        .checkouts
        .with_lock
        .store(false, std::sync::atomic::Ordering::SeqCst);

    let report = on_push(
        world.services(),
        config(PushStrategy::PullRequest),
        push_event(repo("1", "acme", "web"), "main"),
        false,
    )
    .await;

    assert_eq!(report.terminal, Terminal::Aborted);
    assert!(world.npm.commands().is_empty());
    assert!(world.hosting.calls_starting_with("create_check").is_empty());
}
