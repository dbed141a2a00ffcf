//! Error types for the migration engine.
//!
//! Every error belongs to an [`ErrorClass`] that decides how the job layer and
//! the HTTP boundary treat it:
//!
//! - **fatal** (`RecordNotFound`): fail fast, 404.
//! - **recoverable** (`ChecksumMismatch`, `MalformedBundle`, `ContentApply`):
//!   record marked failed, awaits reprocess.
//! - **transient** (`StoreWrite`, `ObjectNotFound`, `Storage`, `QueueFull`,
//!   `MigrationBusy`): retried with backoff.
//! - **client input** (`InvalidTransition`, `InvalidStateForRollback`,
//!   `AlreadyRolledBack`, `NoBackupAvailable`, `DuplicateRecord`): never
//!   retried, 4xx.
//! - **internal** (`JobExhausted`, `Serialization`, `Core`, `Notification`):
//!   triggers terminal handling.

use lingo_core::{InterfaceOrigin, MigrationId};

use crate::record::MigrationStatus;

/// The result type used throughout lingo-migrate.
pub type Result<T> = std::result::Result<T, Error>;

/// How an error should be handled by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Cannot succeed on retry.
    Fatal,
    /// The record is marked failed and waits for manual reprocessing.
    Recoverable,
    /// Worth retrying after a backoff.
    Transient,
    /// The request was invalid for the record's current state.
    ClientInput,
    /// Bookkeeping or programming error.
    Internal,
}

/// Errors that can occur in migration operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The migration record does not exist.
    #[error("migration not found: {id}")]
    RecordNotFound {
        /// The missing record.
        id: MigrationId,
    },

    /// The bundle digest does not match the digest captured at discovery.
    #[error("checksum validation failed: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Digest recorded on the migration record.
        expected: String,
        /// Digest of the bundle as read now.
        actual: String,
    },

    /// The bundle is not valid translation content.
    #[error("malformed bundle: {reason}")]
    MalformedBundle {
        /// What made the bundle unreadable.
        reason: String,
    },

    /// Writing to the object store failed.
    #[error("store write failed for {path}: {message}")]
    StoreWrite {
        /// Object path being written.
        path: String,
        /// Description of the failure.
        message: String,
    },

    /// A required object is missing from the store.
    #[error("object not found: {path}")]
    ObjectNotFound {
        /// Object path that was read.
        path: String,
    },

    /// The requested status change is not in the allowed set.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status.
        from: MigrationStatus,
        /// Requested status.
        to: MigrationStatus,
    },

    /// Rollback was requested for a record that is not completed.
    #[error("migration cannot be rolled back from status {status}")]
    InvalidStateForRollback {
        /// Current status.
        status: MigrationStatus,
    },

    /// Rollback was requested for a record that is already rolled back.
    #[error("Migration has already been rolled back")]
    AlreadyRolledBack {
        /// The record.
        id: MigrationId,
    },

    /// Rollback was requested but the record has no backup.
    #[error("no backup available for migration {id}")]
    NoBackupAvailable {
        /// The record.
        id: MigrationId,
    },

    /// A record already exists for this interface and filename.
    #[error("migration already recorded for {interface}/{filename}")]
    DuplicateRecord {
        /// Target interface.
        interface: InterfaceOrigin,
        /// Bundle filename.
        filename: String,
    },

    /// The content-apply collaborator rejected the bundle.
    #[error("content apply failed: {message}")]
    ContentApply {
        /// Description of the failure.
        message: String,
    },

    /// A job ran out of attempts.
    #[error("job {key} exhausted after {attempts} attempts: {last_error}")]
    JobExhausted {
        /// Uniqueness key of the job.
        key: String,
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last_error: String,
    },

    /// Another worker holds the migration's lease.
    #[error("migration {id} is being processed by {holder} until {until}")]
    MigrationBusy {
        /// The record.
        id: MigrationId,
        /// Lease holder.
        holder: String,
        /// When the lease expires.
        until: chrono::DateTime<chrono::Utc>,
    },

    /// The job queue refused new work.
    #[error("queue {queue} is full")]
    QueueFull {
        /// Queue name.
        queue: String,
    },

    /// An alert could not be delivered.
    #[error("notification failed: {message}")]
    Notification {
        /// Description of the failure.
        message: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An error from lingo-core.
    #[error("core error: {0}")]
    Core(#[from] lingo_core::Error),
}

impl Error {
    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns the handling class of this error.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::RecordNotFound { .. } => ErrorClass::Fatal,
            Self::ChecksumMismatch { .. }
            | Self::MalformedBundle { .. }
            | Self::ContentApply { .. } => ErrorClass::Recoverable,
            Self::StoreWrite { .. }
            | Self::ObjectNotFound { .. }
            | Self::Storage { .. }
            | Self::QueueFull { .. }
            | Self::MigrationBusy { .. } => ErrorClass::Transient,
            Self::InvalidTransition { .. }
            | Self::InvalidStateForRollback { .. }
            | Self::AlreadyRolledBack { .. }
            | Self::NoBackupAvailable { .. }
            | Self::DuplicateRecord { .. } => ErrorClass::ClientInput,
            Self::Core(inner) => match inner {
                lingo_core::Error::Storage { .. } | lingo_core::Error::NotFound(_) => {
                    ErrorClass::Transient
                }
                lingo_core::Error::InvalidInput(_) | lingo_core::Error::InvalidId { .. } => {
                    ErrorClass::ClientInput
                }
                _ => ErrorClass::Internal,
            },
            Self::JobExhausted { .. } | Self::Notification { .. } | Self::Serialization { .. } => {
                ErrorClass::Internal
            }
        }
    }

    /// Returns true if the job layer should retry after a backoff.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient)
    }

    /// Returns a short label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::RecordNotFound { .. } => "record_not_found",
            Self::ChecksumMismatch { .. } => "checksum_mismatch",
            Self::MalformedBundle { .. } => "malformed_bundle",
            Self::StoreWrite { .. } => "store_write",
            Self::ObjectNotFound { .. } => "object_not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::InvalidStateForRollback { .. } => "invalid_state_for_rollback",
            Self::AlreadyRolledBack { .. } => "already_rolled_back",
            Self::NoBackupAvailable { .. } => "no_backup_available",
            Self::DuplicateRecord { .. } => "duplicate_record",
            Self::ContentApply { .. } => "content_apply",
            Self::JobExhausted { .. } => "job_exhausted",
            Self::QueueFull { .. } => "queue_full",
            Self::MigrationBusy { .. } => "migration_busy",
            Self::Notification { .. } => "notification",
            Self::Storage { .. } => "storage",
            Self::Serialization { .. } => "serialization",
            Self::Core(_) => "core",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_rolled_back_message() {
        let err = Error::AlreadyRolledBack {
            id: MigrationId::new(3),
        };
        assert_eq!(err.to_string(), "Migration has already been rolled back");
    }

    #[test]
    fn checksum_mismatch_mentions_checksum() {
        let err = Error::ChecksumMismatch {
            expected: "abc123".into(),
            actual: "zzz999".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("checksum"));
        assert!(msg.contains("abc123"));
        assert!(msg.contains("zzz999"));
    }

    #[test]
    fn classes_drive_retry() {
        assert!(Error::storage("boom").is_retryable());
        assert!(
            Error::ObjectNotFound {
                path: "migrations/mobile/a.json".into()
            }
            .is_retryable()
        );
        assert!(
            Error::StoreWrite {
                path: "backups/x.json".into(),
                message: "timeout".into()
            }
            .is_retryable()
        );
        assert!(!Error::RecordNotFound { id: MigrationId::new(1) }.is_retryable());
        assert!(!Error::NoBackupAvailable { id: MigrationId::new(1) }.is_retryable());
        assert_eq!(
            Error::MalformedBundle {
                reason: "not json".into()
            }
            .class(),
            ErrorClass::Recoverable
        );
        assert_eq!(
            Error::InvalidTransition {
                from: MigrationStatus::RolledBack,
                to: MigrationStatus::Pending,
            }
            .class(),
            ErrorClass::ClientInput
        );
    }

    #[test]
    fn core_storage_errors_are_transient() {
        let err: Error = lingo_core::Error::storage("unavailable").into();
        assert!(err.is_retryable());
        let err: Error = lingo_core::Error::InvalidInput("bad".into()).into();
        assert_eq!(err.class(), ErrorClass::ClientInput);
    }
}
