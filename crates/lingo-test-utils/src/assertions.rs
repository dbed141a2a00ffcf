//! Assertion helpers over migration records.

use lingo_migrate::record::{MigrationRecord, MigrationStatus};

use crate::storage::TracingMemoryBackend;

/// Asserts that `record` is in `expected` status.
#[track_caller]
pub fn assert_status(record: &MigrationRecord, expected: MigrationStatus) {
    assert_eq!(
        record.status, expected,
        "migration {} ({}/{}) expected {expected}, was {}; metadata error: {:?}",
        record.id, record.interface_origin, record.filename, record.status, record.metadata.error
    );
}

/// Asserts that `record` completed and recorded a backup that exists in storage.
#[track_caller]
pub fn assert_completed_with_backup(record: &MigrationRecord, storage: &TracingMemoryBackend) {
    assert_status(record, MigrationStatus::Completed);
    assert!(record.executed_at.is_some(), "completed record without executed_at");
    let backup = record
        .metadata
        .backup_path
        .as_deref()
        .expect("completed record should carry a backup path");
    assert!(
        storage.contents(backup).is_some(),
        "backup {backup} missing from storage"
    );
}

/// Asserts that `record` failed, recording `stage` in its failure history.
#[track_caller]
pub fn assert_failed_at(record: &MigrationRecord, stage: &str) {
    assert_status(record, MigrationStatus::Failed);
    assert!(record.metadata.error.is_some(), "failed record without error");
    assert!(
        record.metadata.failures.iter().any(|f| f.stage == stage),
        "no failure at stage {stage}: {:?}",
        record.metadata.failures
    );
}

/// Asserts that no write landed under `prefix`.
#[track_caller]
pub fn assert_no_writes_under(storage: &TracingMemoryBackend, prefix: &str) {
    let writes = storage.puts_under(prefix);
    assert!(writes.is_empty(), "unexpected writes under {prefix}: {writes:?}");
}
