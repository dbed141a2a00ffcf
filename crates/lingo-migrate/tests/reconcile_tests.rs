//! Reconciliation control loop: environment policy, manifest gate, throttle.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::time::Duration;

use lingo_core::{Environment, InterfaceOrigin};
use lingo_migrate::dispatch::JobQueue;
use lingo_migrate::reconcile::ReconcileOutcome;
use lingo_migrate::record::MigrationStatus;
use lingo_test_utils::{TestContext, assert_status, sample_bundle};

fn throttle_alerts(ctx: &TestContext) -> usize {
    ctx.alerts
        .messages()
        .iter()
        .filter(|m| m.contains("throttle"))
        .count()
}

#[tokio::test]
async fn second_trigger_within_throttle_dispatches_nothing() {
    let ctx = TestContext::new();
    ctx.put_bundle(InterfaceOrigin::Mobile, "mobile_2025-05-01_100000.json", &sample_bundle(2))
        .await;
    let controller = ctx.engine.controller();

    let first = controller.on_migrations_completed().await.expect("first");
    let ReconcileOutcome::Completed(run) = first else {
        panic!("first trigger should run: {first:?}");
    };
    assert_eq!(run.files_synced(), 1);
    assert_eq!(run.jobs_dispatched(), 1);
    let depth = ctx.queue.queue_depth().await.expect("depth");

    ctx.put_bundle(InterfaceOrigin::Mobile, "mobile_2025-05-02_100000.json", &sample_bundle(2))
        .await;
    let second = controller.on_migrations_completed().await.expect("second");
    assert!(matches!(second, ReconcileOutcome::Throttled { .. }));

    assert_eq!(ctx.queue.queue_depth().await.expect("depth"), depth);
    assert_eq!(ctx.ledger.snapshot().expect("snapshot").len(), 1);
    assert_eq!(throttle_alerts(&ctx), 1);
    assert_eq!(ctx.alerts.messages().len(), 2, "run summary plus throttle notice");
}

#[tokio::test]
async fn trigger_after_throttle_expiry_runs_again() {
    let ctx = TestContext::builder()
        .throttle(Duration::from_millis(50))
        .build();
    let controller = ctx.engine.controller();

    assert!(matches!(
        controller.on_migrations_completed().await.expect("first"),
        ReconcileOutcome::Completed(_)
    ));
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(matches!(
        controller.on_migrations_completed().await.expect("second"),
        ReconcileOutcome::Completed(_)
    ));
    assert_eq!(throttle_alerts(&ctx), 0);
}

#[tokio::test]
async fn local_and_staging_never_reconcile() {
    for environment in [Environment::Local, Environment::Staging] {
        let ctx = TestContext::builder().environment(environment).build();
        ctx.put_bundle(InterfaceOrigin::Mobile, "a.json", "{}").await;

        let outcome = ctx
            .engine
            .controller()
            .on_migrations_completed()
            .await
            .expect("trigger");
        assert!(
            matches!(outcome, ReconcileOutcome::Disabled { .. }),
            "{environment}: {outcome:?}"
        );
        assert!(ctx.ledger.snapshot().expect("snapshot").is_empty());
        assert!(ctx.alerts.messages().is_empty());
    }
}

#[tokio::test]
async fn operator_switch_disables_reconciliation() {
    let ctx = TestContext::builder().auto_sync(false).build();

    let outcome = ctx
        .engine
        .controller()
        .on_migrations_completed()
        .await
        .expect("trigger");
    assert!(matches!(outcome, ReconcileOutcome::Disabled { .. }));
    assert!(ctx.storage.paths().is_empty(), "no lease taken");
}

#[tokio::test]
async fn production_applies_only_manifest_approved_bundles() {
    let ctx = TestContext::builder()
        .environment(Environment::Production)
        .interfaces(vec![InterfaceOrigin::WebFinancer])
        .build();
    ctx.put_bundle(InterfaceOrigin::WebFinancer, "approved.json", &sample_bundle(1))
        .await;
    ctx.put_bundle(InterfaceOrigin::WebFinancer, "unlisted.json", &sample_bundle(1))
        .await;
    ctx.manifest
        .approve(InterfaceOrigin::WebFinancer, "approved.json");

    let outcome = ctx
        .engine
        .controller()
        .on_migrations_completed()
        .await
        .expect("trigger");
    assert!(matches!(outcome, ReconcileOutcome::Completed(_)));
    ctx.drain().await;

    let approved = ctx
        .engine
        .ledger()
        .find_by_filename(InterfaceOrigin::WebFinancer, "approved.json")
        .await
        .expect("lookup")
        .expect("record");
    let unlisted = ctx
        .engine
        .ledger()
        .find_by_filename(InterfaceOrigin::WebFinancer, "unlisted.json")
        .await
        .expect("lookup")
        .expect("record");
    assert_status(&approved, MigrationStatus::Completed);
    assert_status(&unlisted, MigrationStatus::Pending);
    assert_eq!(approved.metadata.environment.as_deref(), Some("production"));
    assert_eq!(
        approved.metadata.automation_trigger.as_deref(),
        Some("migrations_ended")
    );
}

#[tokio::test]
async fn dev_applies_everything_discovered() {
    let ctx = TestContext::new();
    for interface in InterfaceOrigin::ALL {
        ctx.put_bundle(interface, "2025-06-01_000000.json", &sample_bundle(1))
            .await;
    }

    let outcome = ctx
        .engine
        .controller()
        .on_migrations_completed()
        .await
        .expect("trigger");
    let ReconcileOutcome::Completed(run) = outcome else {
        panic!("expected a run");
    };
    assert_eq!(run.files_synced(), 3);
    assert_eq!(run.jobs_dispatched(), 3);
    assert!(run.success);

    ctx.drain().await;
    for record in ctx.ledger.snapshot().expect("snapshot") {
        assert_status(&record, MigrationStatus::Completed);
    }
    assert_eq!(ctx.content.apply_calls(), 3);

    let summary = &ctx.alerts.messages()[0];
    assert!(summary.contains("- mobile: 1 file(s) synced, 1 job(s) dispatched"));
}

#[tokio::test]
async fn storage_failure_on_one_interface_is_reported_in_the_run() {
    let ctx = TestContext::new();
    ctx.put_bundle(InterfaceOrigin::Mobile, "a.json", "{}").await;
    ctx.storage.inject_failure("migrations/web_financer/");

    let outcome = ctx
        .engine
        .controller()
        .on_migrations_completed()
        .await
        .expect("trigger");
    let ReconcileOutcome::Completed(run) = outcome else {
        panic!("expected a run");
    };
    assert!(!run.success);
    let financer = run
        .interfaces
        .iter()
        .find(|s| s.interface == InterfaceOrigin::WebFinancer)
        .expect("stats");
    assert!(financer.error.is_some());
    assert_eq!(run.files_synced(), 1);
    assert!(ctx.alerts.messages()[0].contains("finished with errors"));
}
