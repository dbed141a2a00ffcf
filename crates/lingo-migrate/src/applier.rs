//! Apply and rollback orchestration.
//!
//! Both operations run under a per-migration lease in the object store, so
//! two processes sharing a bucket never work on the same record at once.
//!
//! ## Apply
//!
//! 1. Load the record; it must be `pending`.
//! 2. Read the bundle. When validating, compare its digest to the one
//!    captured at discovery; a mismatch fails the record before anything is
//!    written.
//! 3. Parse the bundle. Unreadable content fails the record as malformed.
//! 4. Back up the live content (or the empty baseline) under a path derived
//!    from the record and its reprocess round. The write only succeeds if
//!    the object is absent: a retry of the same round keeps the backup its
//!    predecessor took, and reports key counts against it.
//! 5. Hand the bundle to the [`ContentApplier`].
//! 6. Commit `pending -> completed` or `pending -> failed` in one ledger
//!    write carrying every metadata change of the attempt.
//!
//! Transient errors (storage, missing objects) are returned as `Err` without
//! touching the record, so the job layer can retry from scratch.
//!
//! ## Rollback
//!
//! The record is either `rolled_back` with its backup restored, or still
//! `completed` with the error recorded. A restore whose commit did not land
//! is recorded as `rollback_restored_at`.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::Instrument as _;

use lingo_core::observability::migration_span;
use lingo_core::{Lease, LeaseOutcome, MigrationId, StorageBackend};

use crate::checksum::{ChecksumVerifier, TranslationBundle};
use crate::content::{ApplySummary, ContentApplier};
use crate::error::{Error, Result};
use crate::events::MigrationEvent;
use crate::gateway::{BACKUP_MARKER, BundleGateway};
use crate::ledger::{CommitResult, Ledger};
use crate::metrics::MigrateMetrics;
use crate::record::{MigrationMetadata, MigrationRecord, MigrationStatus, Transition};

/// Extension of backup objects.
pub const BACKUP_EXTENSION: &str = "json";

/// How long a per-migration lease lives if its holder never releases it.
pub const MIGRATION_LEASE_TTL: Duration = Duration::from_secs(600);

/// Object path of the lease guarding migration `id`.
#[must_use]
pub fn migration_lease_path(id: MigrationId) -> String {
    format!("locks/migration_{id}.lease")
}

/// Options for one apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyOptions {
    /// Back up the live content before applying.
    pub create_backup: bool,
    /// Compare the bundle digest to the one captured at discovery.
    pub validate_checksum: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            create_backup: true,
            validate_checksum: true,
        }
    }
}

/// What an apply or rollback did to the record.
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationOutcome {
    /// The bundle was applied; the record is `completed`.
    Applied {
        /// The record after the commit.
        record: MigrationRecord,
        /// Backup written before the apply.
        backup_path: Option<String>,
        /// Key counts.
        summary: ApplySummary,
    },
    /// The bundle was rejected; the record is `failed`.
    Failed {
        /// The record after the commit.
        record: MigrationRecord,
        /// Why.
        error: String,
    },
    /// The backup was restored; the record is `rolled_back`.
    RolledBack {
        /// The record after the commit.
        record: MigrationRecord,
        /// Operator-supplied reason.
        reason: String,
    },
    /// The restore failed; the record is still `completed`.
    RollbackFailed {
        /// The record with the error recorded.
        record: MigrationRecord,
        /// Why.
        error: String,
    },
}

impl MigrationOutcome {
    /// Returns the record as it stands after the operation.
    #[must_use]
    pub const fn record(&self) -> &MigrationRecord {
        match self {
            Self::Applied { record, .. }
            | Self::Failed { record, .. }
            | Self::RolledBack { record, .. }
            | Self::RollbackFailed { record, .. } => record,
        }
    }

    /// Returns a short label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "applied",
            Self::Failed { .. } => "failed",
            Self::RolledBack { .. } => "rolled_back",
            Self::RollbackFailed { .. } => "rollback_failed",
        }
    }

    /// Converts the outcome into the event the job layer publishes.
    #[must_use]
    pub fn to_event(&self) -> MigrationEvent {
        let record = self.record();
        let at = record.updated_at;
        let migration_id = record.id;
        let interface = record.interface_origin;
        let filename = record.filename.clone();
        match self {
            Self::Applied {
                backup_path,
                summary,
                ..
            } => MigrationEvent::Applied {
                migration_id,
                interface,
                filename,
                backup_path: backup_path.clone(),
                summary: *summary,
                at,
            },
            Self::Failed { error, .. } => MigrationEvent::Failed {
                migration_id,
                interface,
                filename,
                error: error.clone(),
                at,
            },
            Self::RolledBack { reason, .. } => MigrationEvent::RolledBack {
                migration_id,
                interface,
                filename,
                reason: reason.clone(),
                at,
            },
            Self::RollbackFailed { error, .. } => MigrationEvent::RollbackFailed {
                migration_id,
                interface,
                filename,
                error: error.clone(),
                at: Utc::now(),
            },
        }
    }
}

/// Applies and rolls back migrations.
#[derive(Clone)]
pub struct MigrationApplier {
    ledger: Arc<dyn Ledger>,
    gateway: BundleGateway,
    content: Arc<dyn ContentApplier>,
    verifier: ChecksumVerifier,
    metrics: MigrateMetrics,
}

impl fmt::Debug for MigrationApplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationApplier").finish_non_exhaustive()
    }
}

impl MigrationApplier {
    /// Creates an applier.
    #[must_use]
    pub fn new(
        ledger: Arc<dyn Ledger>,
        gateway: BundleGateway,
        content: Arc<dyn ContentApplier>,
        verifier: ChecksumVerifier,
    ) -> Self {
        Self {
            ledger,
            gateway,
            content,
            verifier,
            metrics: MigrateMetrics::new(),
        }
    }

    /// Returns the ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// Returns the backup path an apply of `record` writes to.
    #[must_use]
    pub fn backup_path_for(&self, record: &MigrationRecord) -> String {
        self.gateway.backup_path(
            record.interface_origin,
            BACKUP_MARKER,
            &backup_tag(record),
            BACKUP_EXTENSION,
        )
    }

    /// Applies a pending migration.
    ///
    /// A rejected bundle is not an error: it yields
    /// [`MigrationOutcome::Failed`] with the record committed as `failed`.
    ///
    /// # Errors
    ///
    /// - [`Error::RecordNotFound`] if the record does not exist.
    /// - [`Error::InvalidTransition`] if it is not `pending`.
    /// - Transient storage errors, with the record untouched.
    /// - [`Error::MigrationBusy`] if another worker holds the migration.
    pub async fn apply(&self, id: MigrationId, options: ApplyOptions) -> Result<MigrationOutcome> {
        let started = Instant::now();
        let result = self.apply_locked(id, options).await;
        let label = match &result {
            Ok(outcome) => outcome.label(),
            Err(e) => e.label(),
        };
        self.metrics.observe_apply_duration(label, started.elapsed());
        self.metrics.record_outcome("apply", label);
        result
    }

    async fn apply_locked(
        &self,
        id: MigrationId,
        options: ApplyOptions,
    ) -> Result<MigrationOutcome> {
        let lease = self.lock(id, "apply").await?;
        let result = match self.load(id).await {
            Ok(record) => {
                let span = migration_span("apply", id.get(), record.interface_origin.as_str());
                self.apply_record(record, options).instrument(span).await
            }
            Err(e) => Err(e),
        };
        self.unlock(&lease).await;
        result
    }

    async fn apply_record(
        &self,
        record: MigrationRecord,
        options: ApplyOptions,
    ) -> Result<MigrationOutcome> {
        let id = record.id;
        if record.status != MigrationStatus::Pending {
            return Err(Error::InvalidTransition {
                from: record.status,
                to: MigrationStatus::Completed,
            });
        }

        let interface = record.interface_origin;
        let content = self.gateway.read(interface, &record.filename).await?;

        let mut patch = MigrationMetadata::new();
        patch.checksum_validated = Some(options.validate_checksum);

        if options.validate_checksum && !self.verifier.verify(&content, &record.checksum) {
            let error = Error::ChecksumMismatch {
                expected: record.checksum.clone(),
                actual: self.verifier.compute(&content),
            };
            return self.fail(&record, patch, "checksum", &error).await;
        }
        if !options.validate_checksum {
            tracing::warn!(filename = %record.filename, "checksum validation skipped");
        }

        let bundle = match TranslationBundle::parse(&content) {
            Ok(bundle) => bundle,
            Err(e) => return self.fail(&record, patch, "bundle", &e).await,
        };

        let backup = if options.create_backup {
            let current = self.gateway.read_current_or_baseline(interface).await?;
            let backup = self
                .gateway
                .write_backup(
                    interface,
                    BACKUP_MARKER,
                    &backup_tag(&record),
                    current,
                    BACKUP_EXTENSION,
                )
                .await?;
            patch.backup_path = Some(backup.path.clone());
            Some(backup)
        } else {
            None
        };

        let mut summary = match self.content.apply(interface, &bundle).await {
            Ok(summary) => summary,
            Err(e) if e.is_retryable() => return Err(e),
            Err(e) => return self.fail(&record, patch, "apply", &e).await,
        };
        // The live content may already carry an earlier attempt's write.
        if let Some(baseline) = backup.as_ref().filter(|b| b.reused) {
            summary = ApplySummary::against(&baseline.content, &bundle).unwrap_or(summary);
        }
        let backup_path = backup.map(|b| b.path);

        patch.applied_at = Some(Utc::now());
        patch.apply_summary = Some(summary);
        patch.noop = Some(summary.is_noop());

        let record = self
            .commit(
                id,
                Transition::new(MigrationStatus::Pending, MigrationStatus::Completed, patch),
            )
            .await?;

        tracing::info!(
            filename = %record.filename,
            batch_number = record.batch_number,
            backup_path = backup_path.as_deref().unwrap_or("none"),
            keys_added = summary.keys_added,
            keys_updated = summary.keys_updated,
            noop = summary.is_noop(),
            "migration applied"
        );
        Ok(MigrationOutcome::Applied {
            record,
            backup_path,
            summary,
        })
    }

    /// Rolls back a completed migration by restoring its backup.
    ///
    /// A failed restore is not an error: it yields
    /// [`MigrationOutcome::RollbackFailed`] with the record still `completed`.
    ///
    /// # Errors
    ///
    /// - [`Error::RecordNotFound`] if the record does not exist.
    /// - [`Error::AlreadyRolledBack`] if it is already rolled back.
    /// - [`Error::InvalidStateForRollback`] if it is not `completed`.
    /// - [`Error::NoBackupAvailable`] if it has no backup.
    /// - Transient storage errors, with the error recorded on the record.
    /// - [`Error::MigrationBusy`] if another worker holds the migration.
    pub async fn rollback(&self, id: MigrationId, reason: &str) -> Result<MigrationOutcome> {
        let result = self.rollback_locked(id, reason).await;
        let label = match &result {
            Ok(outcome) => outcome.label(),
            Err(e) => e.label(),
        };
        self.metrics.record_outcome("rollback", label);
        result
    }

    async fn rollback_locked(
        &self,
        id: MigrationId,
        reason: &str,
    ) -> Result<MigrationOutcome> {
        let lease = self.lock(id, "rollback").await?;
        let result = match self.load(id).await {
            Ok(record) => {
                let span = migration_span("rollback", id.get(), record.interface_origin.as_str());
                self.rollback_record(record, reason).instrument(span).await
            }
            Err(e) => Err(e),
        };
        self.unlock(&lease).await;
        result
    }

    async fn rollback_record(
        &self,
        record: MigrationRecord,
        reason: &str,
    ) -> Result<MigrationOutcome> {
        let id = record.id;
        match record.status {
            MigrationStatus::Completed => {}
            MigrationStatus::RolledBack => return Err(Error::AlreadyRolledBack { id }),
            status => return Err(Error::InvalidStateForRollback { status }),
        }
        let Some(backup_path) = record.metadata.backup_path.clone() else {
            return Err(Error::NoBackupAvailable { id });
        };

        let mut requested = MigrationMetadata::new();
        requested.rollback_reason = Some(reason.to_string());
        requested.rollback_requested_at = Some(Utc::now());
        let record = self
            .ledger
            .merge_metadata(id, requested)
            .await?
            .ok_or(Error::RecordNotFound { id })?;

        if let Err(e) = self.restore(&record, &backup_path).await {
            return self.rollback_failed(&record, e).await;
        }

        let mut restored = MigrationMetadata::new();
        restored.rollback_restored_at = Some(Utc::now());
        self.ledger.merge_metadata(id, restored).await?;

        let record = self
            .commit(
                id,
                Transition::new(
                    MigrationStatus::Completed,
                    MigrationStatus::RolledBack,
                    MigrationMetadata::new(),
                ),
            )
            .await?;

        tracing::info!(
            filename = %record.filename,
            backup_path = %backup_path,
            "migration rolled back"
        );
        Ok(MigrationOutcome::RolledBack {
            record,
            reason: reason.to_string(),
        })
    }

    /// Moves a failed migration back to `pending` so it can be applied again.
    ///
    /// # Errors
    ///
    /// - [`Error::RecordNotFound`] if the record does not exist.
    /// - [`Error::InvalidTransition`] if it is not `failed`.
    pub async fn reprocess(&self, id: MigrationId) -> Result<MigrationRecord> {
        let current = self.load(id).await?;
        let mut patch = MigrationMetadata::new();
        patch.reprocess_requested_at = Some(Utc::now());
        patch.reprocess_count = Some(current.metadata.reprocess_count.unwrap_or(0) + 1);
        let record = self
            .commit(
                id,
                Transition::new(MigrationStatus::Failed, MigrationStatus::Pending, patch),
            )
            .await?;
        tracing::info!(migration_id = %id, "failed migration queued for reprocessing");
        Ok(record)
    }

    async fn lock(&self, id: MigrationId, operation: &str) -> Result<Lease<dyn StorageBackend>> {
        let storage: Arc<dyn StorageBackend> = Arc::clone(self.gateway.storage());
        let lease = Lease::new(storage, migration_lease_path(id));
        let purpose = Some(format!("{operation} migration {id}"));
        match lease.try_acquire(MIGRATION_LEASE_TTL, purpose).await? {
            LeaseOutcome::Acquired(_) => Ok(lease),
            LeaseOutcome::Held(info) => {
                tracing::info!(
                    migration_id = %id,
                    holder = %info.holder_id,
                    until = %info.expires_at,
                    "migration held by another worker"
                );
                Err(Error::MigrationBusy {
                    id,
                    holder: info.holder_id,
                    until: info.expires_at,
                })
            }
        }
    }

    async fn unlock(&self, lease: &Lease<dyn StorageBackend>) {
        if let Err(e) = lease.release_if_held().await {
            tracing::warn!(path = lease.path(), error = %e, "failed to release migration lease");
        }
    }

    async fn load(&self, id: MigrationId) -> Result<MigrationRecord> {
        self.ledger
            .get(id)
            .await?
            .ok_or(Error::RecordNotFound { id })
    }

    async fn restore(&self, record: &MigrationRecord, backup_path: &str) -> Result<()> {
        let backup: Bytes = self.gateway.read_object(backup_path).await?;
        self.content.restore(record.interface_origin, backup).await
    }

    async fn commit(&self, id: MigrationId, transition: Transition) -> Result<MigrationRecord> {
        let to = transition.to;
        match self.ledger.commit_transition(id, transition).await? {
            CommitResult::Committed(record) => Ok(record),
            CommitResult::NotFound => Err(Error::RecordNotFound { id }),
            CommitResult::StateMismatch { actual } => {
                Err(Error::InvalidTransition { from: actual, to })
            }
        }
    }

    async fn fail(
        &self,
        record: &MigrationRecord,
        mut patch: MigrationMetadata,
        stage: &str,
        error: &Error,
    ) -> Result<MigrationOutcome> {
        let now = Utc::now();
        let message = error.to_string();
        patch.error = Some(message.clone());
        patch.failed_at = Some(now);
        patch.push_failure(now, stage, message.clone());

        let record = self
            .commit(
                record.id,
                Transition {
                    from: MigrationStatus::Pending,
                    to: MigrationStatus::Failed,
                    patch,
                    at: now,
                },
            )
            .await?;

        tracing::warn!(
            filename = %record.filename,
            stage = stage,
            error_kind = error.label(),
            error = %message,
            "migration failed"
        );
        Ok(MigrationOutcome::Failed {
            record,
            error: message,
        })
    }

    async fn rollback_failed(
        &self,
        record: &MigrationRecord,
        error: Error,
    ) -> Result<MigrationOutcome> {
        let now = Utc::now();
        let message = error.to_string();
        let mut patch = MigrationMetadata::new();
        patch.rollback_error = Some(message.clone());
        patch.rollback_failed_at = Some(now);
        patch.push_failure(now, "rollback", message.clone());

        let record = self
            .ledger
            .merge_metadata(record.id, patch)
            .await?
            .ok_or(Error::RecordNotFound { id: record.id })?;

        tracing::warn!(
            filename = %record.filename,
            error_kind = error.label(),
            error = %message,
            "rollback failed; record stays completed"
        );
        if error.is_retryable() {
            return Err(error);
        }
        Ok(MigrationOutcome::RollbackFailed {
            record,
            error: message,
        })
    }
}

/// Backup tag for a record: its version, its ID, and its reprocess round.
///
/// Identical across retries within a round; a reprocessed record backs up
/// afresh because other migrations may have changed the content since.
fn backup_tag(record: &MigrationRecord) -> String {
    match record.metadata.reprocess_count {
        Some(round) if round > 0 => format!("{}-m{}-r{round}", record.version, record.id),
        _ => format!("{}-m{}", record.version, record.id),
    }
}
