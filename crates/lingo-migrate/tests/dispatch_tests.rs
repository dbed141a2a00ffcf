//! Job dispatch, uniqueness and retry behavior through the worker.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::time::Duration;

use lingo_core::{InterfaceOrigin, WritePrecondition};
use lingo_migrate::applier::ApplyOptions;
use lingo_migrate::dispatch::{EnqueueResult, JobQueue};
use lingo_migrate::job::JobKind;
use lingo_migrate::record::MigrationStatus;
use lingo_migrate::retry::RetryPolicy;
use lingo_migrate::worker::JobOutput;
use lingo_test_utils::{
    InjectedFailure, StorageOp, TestContext, assert_completed_with_backup, assert_status,
    sample_bundle,
};

const MOBILE_CURRENT: &str = "migrations/mobile/current.json";

#[tokio::test]
async fn duplicate_apply_dispatch_runs_content_apply_once() {
    let ctx = TestContext::new();
    let record = ctx
        .seed_pending(InterfaceOrigin::Mobile, "a.json", &sample_bundle(3))
        .await;
    let dispatcher = ctx.engine.dispatcher();

    let first = dispatcher
        .dispatch_apply(record.id, ApplyOptions::default())
        .await
        .expect("dispatch");
    let second = dispatcher
        .dispatch_apply(record.id, ApplyOptions::default())
        .await
        .expect("dispatch");
    assert!(first.is_enqueued());
    assert!(matches!(second, EnqueueResult::Deduplicated { .. }));

    assert_eq!(ctx.drain().await, 1);
    assert_eq!(ctx.content.apply_calls(), 1);
    assert_status(&ctx.record(record.id).await, MigrationStatus::Completed);
}

#[tokio::test]
async fn rollback_shares_the_apply_key() {
    let ctx = TestContext::new();
    let record = ctx.seed_pending(InterfaceOrigin::Mobile, "a.json", "{}").await;
    let dispatcher = ctx.engine.dispatcher();

    dispatcher
        .dispatch_apply(record.id, ApplyOptions::default())
        .await
        .expect("dispatch");
    let rollback = dispatcher
        .dispatch_rollback(record.id, "oops".to_string())
        .await
        .expect("dispatch");
    assert!(!rollback.is_enqueued());
    assert_eq!(ctx.queue.queue_depth().await.expect("depth"), 1);
}

#[tokio::test]
async fn key_is_released_after_completion() {
    let ctx = TestContext::new();
    let record = ctx
        .seed_pending(InterfaceOrigin::WebFinancer, "a.json", &sample_bundle(1))
        .await;
    let dispatcher = ctx.engine.dispatcher();

    dispatcher
        .dispatch_apply(record.id, ApplyOptions::default())
        .await
        .expect("dispatch");
    ctx.drain().await;

    let again = dispatcher
        .dispatch_rollback(record.id, "revert".to_string())
        .await
        .expect("dispatch");
    assert!(again.is_enqueued());
    ctx.drain().await;
    assert_status(&ctx.record(record.id).await, MigrationStatus::RolledBack);
}

#[tokio::test]
async fn resync_without_new_bundles_dispatches_nothing() {
    let ctx = TestContext::new();
    ctx.put_bundle(InterfaceOrigin::Mobile, "mobile_2025-01-01_000000.json", &sample_bundle(2))
        .await;
    ctx.put_bundle(InterfaceOrigin::Mobile, "mobile_2025-01-02_000000.json", &sample_bundle(2))
        .await;
    let kind = JobKind::SyncInterface {
        interface: InterfaceOrigin::Mobile,
        auto_process: true,
    };

    let first = ctx.engine.handler().handle(&kind).await.expect("sync");
    let JobOutput::Synced { report, dispatched } = first else {
        panic!("unexpected output: {first:?}");
    };
    assert_eq!(report.synced(), 2);
    assert_eq!(dispatched, 2);
    ctx.drain().await;

    let second = ctx.engine.handler().handle(&kind).await.expect("sync");
    let JobOutput::Synced { report, dispatched } = second else {
        panic!("unexpected output: {second:?}");
    };
    assert_eq!(report.synced(), 0);
    assert_eq!(report.skipped_existing, 2);
    assert_eq!(dispatched, 0);
    assert_eq!(ctx.ledger.snapshot().expect("snapshot").len(), 2);
    assert_eq!(ctx.queue.queue_depth().await.expect("depth"), 0);
}

#[tokio::test]
async fn sync_without_auto_process_only_records() {
    let ctx = TestContext::new();
    ctx.put_bundle(InterfaceOrigin::WebBeneficiary, "x.json", "{}")
        .await;

    ctx.engine
        .dispatcher()
        .dispatch_sync(InterfaceOrigin::WebBeneficiary, false)
        .await
        .expect("dispatch");
    assert_eq!(ctx.drain().await, 1);

    let records = ctx.ledger.snapshot().expect("snapshot");
    assert_eq!(records.len(), 1);
    assert_status(&records[0], MigrationStatus::Pending);
    assert_eq!(records[0].metadata.auto_process, Some(false));
    assert_eq!(ctx.content.apply_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_retry_with_backoff() {
    let ctx = TestContext::new();
    ctx.put_object(MOBILE_CURRENT, r#"{"greeting":"old"}"#).await;
    ctx.content.fail_apply_times(InjectedFailure::Transient, 2);
    let record = ctx
        .seed_pending(InterfaceOrigin::Mobile, "a.json", &sample_bundle(2))
        .await;

    ctx.engine
        .dispatcher()
        .dispatch_apply(record.id, ApplyOptions::default())
        .await
        .expect("dispatch");
    let started = tokio::time::Instant::now();
    assert_eq!(ctx.drain_all().await, 3);

    assert!(started.elapsed() >= Duration::from_secs(120));
    assert_eq!(ctx.content.apply_calls(), 3);
    let record = ctx.record(record.id).await;
    assert_completed_with_backup(&record, &ctx.storage);
    let backup_puts = ctx.storage.puts_under("backups/");
    assert_eq!(backup_puts.len(), 3);
    assert!(backup_puts.iter().all(|op| matches!(
        op,
        StorageOp::Put {
            precondition: WritePrecondition::DoesNotExist,
            ..
        }
    )));
    assert_eq!(
        ctx.storage
            .paths()
            .iter()
            .filter(|p| p.starts_with("backups/"))
            .count(),
        1
    );
    let backup = record.metadata.backup_path.expect("backup path");
    assert_eq!(
        ctx.storage.contents(&backup).expect("backup"),
        r#"{"greeting":"old"}"#
    );
}

#[tokio::test(start_paused = true)]
async fn lost_commit_is_retried_against_the_original_backup() {
    let ctx = TestContext::new();
    ctx.put_object(MOBILE_CURRENT, r#"{"greeting":"old"}"#).await;
    ctx.ledger_faults.fail_commits_to(MigrationStatus::Completed, 1);
    let record = ctx
        .seed_pending(InterfaceOrigin::Mobile, "a.json", r#"{"greeting":"new"}"#)
        .await;

    ctx.engine
        .dispatcher()
        .dispatch_apply(record.id, ApplyOptions::default())
        .await
        .expect("dispatch");
    assert_eq!(ctx.drain_all().await, 2);
    assert_eq!(ctx.content.apply_calls(), 2);

    let applied = ctx.record(record.id).await;
    assert_completed_with_backup(&applied, &ctx.storage);
    assert_eq!(applied.metadata.noop, Some(false));
    assert_eq!(
        applied.metadata.backup_path.as_deref(),
        Some(ctx.engine.applier().backup_path_for(&record).as_str())
    );

    ctx.engine
        .dispatcher()
        .dispatch_rollback(record.id, "bad copy".to_string())
        .await
        .expect("dispatch");
    ctx.drain().await;
    assert_status(&ctx.record(record.id).await, MigrationStatus::RolledBack);
    let restored = ctx.content.restored();
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].1, r#"{"greeting":"old"}"#);
}

#[tokio::test(start_paused = true)]
async fn exhausted_apply_is_marked_failed() {
    let ctx = TestContext::new();
    ctx.content.fail_apply(InjectedFailure::Transient);
    let record = ctx
        .seed_pending(InterfaceOrigin::Mobile, "a.json", &sample_bundle(2))
        .await;

    ctx.engine
        .dispatcher()
        .dispatch_apply(record.id, ApplyOptions::default())
        .await
        .expect("dispatch");
    assert_eq!(ctx.drain_all().await, 3);

    let record = ctx.record(record.id).await;
    assert_status(&record, MigrationStatus::Failed);
    assert_eq!(record.metadata.failed_attempts, Some(3));
    assert!(record.metadata.job_failed_at.is_some());
    assert!(record.metadata.backup_path.is_some(), "backup from the lost attempt is kept");
    assert_eq!(ctx.queue.queue_depth().await.expect("depth"), 0);
    assert!(ctx.events.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn exhausted_apply_points_at_the_backup_it_left() {
    let ctx = TestContext::builder()
        .retry_policy(RetryPolicy::new(2, Duration::from_secs(5)))
        .build();
    ctx.put_object(MOBILE_CURRENT, r#"{"title":"Home"}"#).await;
    ctx.content.fail_apply(InjectedFailure::Transient);
    let with_backup = ctx
        .seed_pending(InterfaceOrigin::Mobile, "a.json", &sample_bundle(1))
        .await;
    let without_backup = ctx
        .seed_pending(InterfaceOrigin::Mobile, "b.json", &sample_bundle(1))
        .await;

    let dispatcher = ctx.engine.dispatcher();
    dispatcher
        .dispatch_apply(with_backup.id, ApplyOptions::default())
        .await
        .expect("dispatch");
    let no_backup = ApplyOptions {
        create_backup: false,
        validate_checksum: true,
    };
    dispatcher
        .dispatch_apply(without_backup.id, no_backup)
        .await
        .expect("dispatch");
    assert_eq!(ctx.drain_all().await, 4);

    let record = ctx.record(with_backup.id).await;
    assert_status(&record, MigrationStatus::Failed);
    assert_eq!(record.metadata.failed_attempts, Some(2));
    let expected = ctx.engine.applier().backup_path_for(&with_backup);
    assert_eq!(record.metadata.backup_path.as_deref(), Some(expected.as_str()));
    assert_eq!(
        ctx.storage.contents(&expected).expect("backup"),
        r#"{"title":"Home"}"#
    );

    let record = ctx.record(without_backup.id).await;
    assert_status(&record, MigrationStatus::Failed);
    assert!(record.metadata.backup_path.is_none());
}

#[tokio::test(start_paused = true)]
async fn exhausted_rollback_shows_the_restore_happened() {
    let ctx = TestContext::new();
    let record = ctx
        .seed_completed(InterfaceOrigin::Mobile, "a.json", &sample_bundle(1))
        .await;
    ctx.ledger_faults.fail_commits_to(MigrationStatus::RolledBack, 3);

    ctx.engine
        .dispatcher()
        .dispatch_rollback(record.id, "wrong locale".to_string())
        .await
        .expect("dispatch");
    assert_eq!(ctx.drain_all().await, 3);

    let record = ctx.record(record.id).await;
    assert_status(&record, MigrationStatus::Completed);
    assert!(record.metadata.rollback_restored_at.is_some());
    assert!(record.metadata.rollback_error.is_some());
    assert_eq!(record.metadata.failed_attempts, Some(3));
    assert_eq!(ctx.content.restore_calls(), 3);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let ctx = TestContext::new();
    let record = ctx
        .seed_completed(InterfaceOrigin::Mobile, "a.json", &sample_bundle(1))
        .await;

    ctx.engine
        .dispatcher()
        .dispatch_apply(record.id, ApplyOptions::default())
        .await
        .expect("dispatch");
    assert_eq!(ctx.drain().await, 1);

    assert_eq!(ctx.content.apply_calls(), 1);
    assert_status(&ctx.record(record.id).await, MigrationStatus::Completed);
    assert_eq!(ctx.queue.queue_depth().await.expect("depth"), 0);
}

#[tokio::test(start_paused = true)]
async fn retried_reprocess_moves_the_record_once() {
    let ctx = TestContext::new();
    ctx.content.fail_apply_times(InjectedFailure::Reject, 1);
    let record = ctx
        .seed_pending(InterfaceOrigin::WebBeneficiary, "a.json", &sample_bundle(1))
        .await;
    ctx.engine
        .applier()
        .apply(record.id, ApplyOptions::default())
        .await
        .expect("apply");
    assert_status(&ctx.record(record.id).await, MigrationStatus::Failed);

    ctx.ledger_faults.fail_commits_to(MigrationStatus::Completed, 1);
    ctx.engine
        .dispatcher()
        .dispatch_reprocess(record.id, ApplyOptions::default())
        .await
        .expect("dispatch");
    assert_eq!(ctx.drain_all().await, 2);

    let record = ctx.record(record.id).await;
    assert_completed_with_backup(&record, &ctx.storage);
    assert_eq!(record.metadata.reprocess_count, Some(1));
    assert!(
        record
            .metadata
            .backup_path
            .as_deref()
            .is_some_and(|p| p.ends_with("-r1.json"))
    );
}
