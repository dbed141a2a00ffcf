//! Migration records and their lifecycle state machine.
//!
//! ```text
//! pending ──► completed ──► rolled_back
//!    │  ▲
//!    ▼  │ (manual reprocess)
//!  failed
//! ```
//!
//! [`transition`] is the only function that changes `status`, `executed_at`
//! or `rolled_back_at`. It never removes metadata: patches are merged on top
//! of what is already recorded, so earlier failures stay visible after a
//! later success.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use lingo_core::{InterfaceOrigin, MigrationId};

use crate::content::ApplySummary;
use crate::error::{Error, Result};

/// Current layout version of [`MigrationMetadata`].
pub const METADATA_VERSION: u32 = 1;

/// Filename timestamp format used to derive a migration's version.
pub const VERSION_FORMAT: &str = "%Y-%m-%d_%H%M%S";

/// Lifecycle state of a migration record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Discovered, not yet applied.
    Pending,
    /// Applied successfully.
    Completed,
    /// Apply failed; waits for manual reprocessing.
    Failed,
    /// Reverted from its backup. Terminal.
    RolledBack,
}

impl MigrationStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 4] = [Self::Pending, Self::Completed, Self::Failed, Self::RolledBack];

    /// Returns whether this status can transition to the target status.
    #[must_use]
    pub const fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::Pending => matches!(target, Self::Completed | Self::Failed),
            Self::Completed => matches!(target, Self::RolledBack),
            Self::Failed => matches!(target, Self::Pending),
            Self::RolledBack => false,
        }
    }

    /// Returns all valid target statuses from this status.
    #[must_use]
    pub fn valid_transitions(&self) -> Vec<Self> {
        Self::ALL
            .into_iter()
            .filter(|target| self.can_transition_to(*target))
            .collect()
    }

    /// Returns true if no transition leaves this status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::RolledBack)
    }

    /// Returns a lowercase label suitable for metrics, logs and the wire.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

impl FromStr for MigrationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_label() == s)
            .ok_or_else(|| lingo_core::Error::InvalidInput(format!("unknown status '{s}'")).into())
    }
}

/// One entry in a record's failure history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    /// When the failure was recorded.
    pub at: DateTime<Utc>,
    /// Which step failed (`checksum`, `bundle`, `apply`, `rollback`, `job`).
    pub stage: String,
    /// Error text.
    pub error: String,
}

/// Typed, versioned metadata attached to a migration record.
///
/// Every known key is an optional field. Unknown keys written by newer
/// versions survive a read/modify/write cycle through `extra`.
///
/// Used both as the stored value and as a patch: see [`MigrationMetadata::merge`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationMetadata {
    /// Layout version.
    pub schema_version: u32,

    /// Path of the pre-apply backup in the object store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<String>,
    /// Whether the checksum was verified on the last apply. `false` means
    /// the caller skipped the check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum_validated: Option<bool>,
    /// Last apply error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the last apply failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    /// When content was applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
    /// Key counts reported by the content applier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apply_summary: Option<ApplySummary>,
    /// True if the apply changed no keys.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noop: Option<bool>,

    /// Operator-supplied rollback reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_reason: Option<String>,
    /// When the rollback was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_requested_at: Option<DateTime<Utc>>,
    /// Last rollback error. The record stays `completed` when this is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_error: Option<String>,
    /// When the last rollback attempt failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_failed_at: Option<DateTime<Utc>>,
    /// When the backup was written back to live content. Set even if the
    /// `rolled_back` commit that should follow has not landed yet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_restored_at: Option<DateTime<Utc>>,
    /// When an operator moved a failed record back to pending.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reprocess_requested_at: Option<DateTime<Utc>>,
    /// How many times the record was moved back to pending. Each round gets
    /// its own backup object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reprocess_count: Option<u32>,

    /// Attempts made by the job that exhausted its retries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_attempts: Option<u32>,
    /// When the job's retries were exhausted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_failed_at: Option<DateTime<Utc>>,
    /// Final error of the exhausted job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_error: Option<String>,

    /// Object path the bundle was discovered at.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    /// When the bundle was discovered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
    /// True if discovery was allowed to dispatch apply jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_process: Option<bool>,
    /// What triggered discovery (`migrations_ended` for reconciliation).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automation_trigger: Option<String>,
    /// Environment the discovery ran in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    /// Every failure ever recorded, oldest first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureEntry>,

    /// Keys this version does not know about.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for MigrationMetadata {
    fn default() -> Self {
        Self {
            schema_version: METADATA_VERSION,
            backup_path: None,
            checksum_validated: None,
            error: None,
            failed_at: None,
            applied_at: None,
            apply_summary: None,
            noop: None,
            rollback_reason: None,
            rollback_requested_at: None,
            rollback_error: None,
            rollback_failed_at: None,
            rollback_restored_at: None,
            reprocess_requested_at: None,
            reprocess_count: None,
            failed_attempts: None,
            job_failed_at: None,
            job_error: None,
            source_path: None,
            synced_at: None,
            auto_process: None,
            automation_trigger: None,
            environment: None,
            failures: Vec::new(),
            extra: BTreeMap::new(),
        }
    }
}

macro_rules! merge_fields {
    ($target:expr, $patch:expr, $($field:ident),+ $(,)?) => {
        $(
            if $patch.$field.is_some() {
                $target.$field = $patch.$field;
            }
        )+
    };
}

impl MigrationMetadata {
    /// Creates an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges `patch` on top of `self`.
    ///
    /// Fields set in the patch replace the stored value; fields absent from
    /// the patch are left alone. Failures are appended. Nothing is ever cleared.
    pub fn merge(&mut self, patch: Self) {
        merge_fields!(
            self,
            patch,
            backup_path,
            checksum_validated,
            error,
            failed_at,
            applied_at,
            apply_summary,
            noop,
            rollback_reason,
            rollback_requested_at,
            rollback_error,
            rollback_failed_at,
            rollback_restored_at,
            reprocess_requested_at,
            reprocess_count,
            failed_attempts,
            job_failed_at,
            job_error,
            source_path,
            synced_at,
            auto_process,
            automation_trigger,
            environment,
        );
        self.schema_version = self.schema_version.max(patch.schema_version);
        self.failures.extend(patch.failures);
        self.extra.extend(patch.extra);
    }

    /// Appends a failure to the history.
    pub fn push_failure(&mut self, at: DateTime<Utc>, stage: &str, error: impl Into<String>) {
        self.failures.push(FailureEntry {
            at,
            stage: stage.to_string(),
            error: error.into(),
        });
    }
}

/// A row of the migration ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Surrogate key.
    pub id: MigrationId,
    /// Interface the bundle targets.
    pub interface_origin: InterfaceOrigin,
    /// Bundle filename within the interface directory.
    pub filename: String,
    /// Version derived from the filename.
    pub version: String,
    /// Digest captured at discovery. Never changes.
    pub checksum: String,
    /// Lifecycle state.
    pub status: MigrationStatus,
    /// When the record reached `completed`.
    pub executed_at: Option<DateTime<Utc>>,
    /// When the record reached `rolled_back`.
    pub rolled_back_at: Option<DateTime<Utc>>,
    /// Audit grouping assigned on completion.
    pub batch_number: Option<u64>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
    /// Audit metadata.
    pub metadata: MigrationMetadata,
}

impl MigrationRecord {
    /// Builds the initial pending record for a discovered bundle.
    #[must_use]
    pub fn new_pending(id: MigrationId, new: NewMigration, now: DateTime<Utc>) -> Self {
        Self {
            id,
            interface_origin: new.interface_origin,
            filename: new.filename,
            version: new.version,
            checksum: new.checksum,
            status: MigrationStatus::Pending,
            executed_at: None,
            rolled_back_at: None,
            batch_number: None,
            created_at: now,
            updated_at: now,
            metadata: new.metadata,
        }
    }
}

/// Input for creating a ledger record.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMigration {
    /// Interface the bundle targets.
    pub interface_origin: InterfaceOrigin,
    /// Bundle filename.
    pub filename: String,
    /// Version derived from the filename.
    pub version: String,
    /// Digest of the bundle at discovery.
    pub checksum: String,
    /// Initial metadata.
    pub metadata: MigrationMetadata,
}

/// A requested status change with the metadata it records.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Status the caller expects the record to be in.
    pub from: MigrationStatus,
    /// Status to move to.
    pub to: MigrationStatus,
    /// Metadata merged in the same step.
    pub patch: MigrationMetadata,
    /// Time of the change.
    pub at: DateTime<Utc>,
}

impl Transition {
    /// Creates a transition stamped with the current time.
    #[must_use]
    pub fn new(from: MigrationStatus, to: MigrationStatus, patch: MigrationMetadata) -> Self {
        Self {
            from,
            to,
            patch,
            at: Utc::now(),
        }
    }
}

/// Applies a status change to a record, returning the new record.
///
/// # Errors
///
/// - [`Error::InvalidTransition`] if `record.status` cannot move to `target`.
/// - [`Error::NoBackupAvailable`] if `target` is `rolled_back` and the merged
///   metadata has no backup path.
pub fn transition(
    record: &MigrationRecord,
    target: MigrationStatus,
    patch: MigrationMetadata,
    now: DateTime<Utc>,
) -> Result<MigrationRecord> {
    if !record.status.can_transition_to(target) {
        return Err(Error::InvalidTransition {
            from: record.status,
            to: target,
        });
    }

    let mut next = record.clone();
    next.metadata.merge(patch);

    match target {
        MigrationStatus::Completed => next.executed_at = Some(now),
        MigrationStatus::RolledBack => {
            if next.metadata.backup_path.is_none() {
                return Err(Error::NoBackupAvailable { id: record.id });
            }
            next.rolled_back_at = Some(now);
        }
        MigrationStatus::Pending | MigrationStatus::Failed => {}
    }

    next.status = target;
    next.updated_at = now;
    Ok(next)
}

/// Derives a migration version from a bundle filename.
///
/// The version is the first `YYYY-MM-DD_HHMMSS` timestamp embedded in the
/// name. Names without one fall back to `now` in the same format.
#[must_use]
pub fn extract_version(filename: &str, now: DateTime<Utc>) -> String {
    const LEN: usize = "YYYY-MM-DD_HHMMSS".len();

    let bytes = filename.as_bytes();
    (0..bytes.len().saturating_sub(LEN - 1))
        .filter_map(|start| filename.get(start..start + LEN))
        .find(|candidate| NaiveDateTime::parse_from_str(candidate, VERSION_FORMAT).is_ok())
        .map_or_else(|| now.format(VERSION_FORMAT).to_string(), str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn pending() -> MigrationRecord {
        MigrationRecord::new_pending(
            MigrationId::new(1),
            NewMigration {
                interface_origin: InterfaceOrigin::Mobile,
                filename: "2025-03-01_120000.json".into(),
                version: "2025-03-01_120000".into(),
                checksum: "abc123".into(),
                metadata: MigrationMetadata::new(),
            },
            Utc::now(),
        )
    }

    #[test]
    fn allowed_transitions() {
        use MigrationStatus::{Completed, Failed, Pending, RolledBack};
        assert_eq!(Pending.valid_transitions(), vec![Completed, Failed]);
        assert_eq!(Completed.valid_transitions(), vec![RolledBack]);
        assert_eq!(Failed.valid_transitions(), vec![Pending]);
        assert!(RolledBack.valid_transitions().is_empty());
        assert!(RolledBack.is_terminal());
    }

    #[test]
    fn completing_sets_executed_at() {
        let now = Utc::now();
        let done = transition(&pending(), MigrationStatus::Completed, MigrationMetadata::new(), now)
            .unwrap();
        assert_eq!(done.status, MigrationStatus::Completed);
        assert_eq!(done.executed_at, Some(now));
        assert_eq!(done.updated_at, now);
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let err = transition(
            &pending(),
            MigrationStatus::RolledBack,
            MigrationMetadata::new(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: MigrationStatus::Pending,
                to: MigrationStatus::RolledBack
            }
        ));
    }

    #[test]
    fn rollback_requires_backup() {
        let done = transition(
            &pending(),
            MigrationStatus::Completed,
            MigrationMetadata::new(),
            Utc::now(),
        )
        .unwrap();
        let err = transition(
            &done,
            MigrationStatus::RolledBack,
            MigrationMetadata::new(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::NoBackupAvailable { .. }));
    }

    #[test]
    fn merge_never_clears_fields() {
        let mut stored = MigrationMetadata::new();
        stored.error = Some("checksum validation failed".into());
        stored.push_failure(Utc::now(), "checksum", "checksum validation failed");

        let mut patch = MigrationMetadata::new();
        patch.backup_path = Some("backups/mobile/x.json".into());
        patch.push_failure(Utc::now(), "apply", "boom");
        stored.merge(patch);

        assert_eq!(stored.error.as_deref(), Some("checksum validation failed"));
        assert_eq!(stored.backup_path.as_deref(), Some("backups/mobile/x.json"));
        assert_eq!(stored.failures.len(), 2);
    }

    #[test]
    fn unknown_metadata_keys_survive() {
        let json = r#"{"schema_version":1,"error":"x","legacy_field":{"a":1}}"#;
        let meta: MigrationMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.error.as_deref(), Some("x"));
        assert!(meta.extra.contains_key("legacy_field"));

        let back = serde_json::to_value(&meta).unwrap();
        assert_eq!(back["legacy_field"]["a"], 1);
        assert!(back.get("backup_path").is_none());
    }

    #[test]
    fn extracts_version_from_filename() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            extract_version("translations_2025-03-01_120000.json", now),
            "2025-03-01_120000"
        );
        assert_eq!(extract_version("2025-13-01_120000.json", now), "2024-01-02_030405");
        assert_eq!(extract_version("mobile.json", now), "2024-01-02_030405");
        assert_eq!(extract_version("", now), "2024-01-02_030405");
    }

    #[test]
    fn status_parses_wire_labels() {
        assert_eq!("rolled_back".parse::<MigrationStatus>().unwrap(), MigrationStatus::RolledBack);
        assert!("done".parse::<MigrationStatus>().is_err());
    }
}
