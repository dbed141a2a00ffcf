//! Units of background work and their uniqueness keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lingo_core::{Environment, InterfaceOrigin, JobId, MigrationId};

use crate::applier::ApplyOptions;

/// A unit of background work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobKind {
    /// Apply one pending migration.
    ApplyMigration {
        /// The record to apply.
        migration_id: MigrationId,
        /// Apply options.
        #[serde(default)]
        options: ApplyOptions,
    },
    /// Move a failed migration back to pending, then apply it.
    ReprocessMigration {
        /// The record to reprocess.
        migration_id: MigrationId,
        /// Apply options.
        #[serde(default)]
        options: ApplyOptions,
    },
    /// Roll back one completed migration.
    RollbackMigration {
        /// The record to roll back.
        migration_id: MigrationId,
        /// Operator-supplied reason.
        reason: String,
    },
    /// Discover new bundles for one interface.
    SyncInterface {
        /// Interface to scan.
        interface: InterfaceOrigin,
        /// Dispatch applies for pending records after discovery.
        #[serde(default)]
        auto_process: bool,
    },
    /// Dispatch applies for pending records under environment policy.
    AutoProcessInterface {
        /// Interface to process.
        interface: InterfaceOrigin,
        /// Environment the run was triggered in.
        environment: Environment,
        /// Only dispatch bundles listed in the manifest.
        require_manifest: bool,
    },
}

impl JobKind {
    /// Returns the key that makes at most one such job live at a time.
    ///
    /// Every job on the same record shares a key, so they never run
    /// concurrently.
    #[must_use]
    pub fn unique_key(&self) -> String {
        match self {
            Self::ApplyMigration { migration_id, .. }
            | Self::ReprocessMigration { migration_id, .. }
            | Self::RollbackMigration { migration_id, .. } => {
                format!("migration_{migration_id}")
            }
            Self::SyncInterface { interface, .. } => format!("sync_{interface}"),
            Self::AutoProcessInterface { interface, .. } => {
                format!("auto_translation_migration_{interface}")
            }
        }
    }

    /// Returns a short label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::ApplyMigration { .. } => "apply_migration",
            Self::ReprocessMigration { .. } => "reprocess_migration",
            Self::RollbackMigration { .. } => "rollback_migration",
            Self::SyncInterface { .. } => "sync_interface",
            Self::AutoProcessInterface { .. } => "auto_process_interface",
        }
    }

    /// Returns the migration this job targets, if any.
    #[must_use]
    pub const fn migration_id(&self) -> Option<MigrationId> {
        match self {
            Self::ApplyMigration { migration_id, .. }
            | Self::ReprocessMigration { migration_id, .. }
            | Self::RollbackMigration { migration_id, .. } => Some(*migration_id),
            Self::SyncInterface { .. } | Self::AutoProcessInterface { .. } => None,
        }
    }
}

/// A job as it travels through the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvelope {
    /// Unique job identifier. Stable across retries.
    pub job_id: JobId,
    /// The work.
    pub kind: JobKind,
    /// Attempt number (1-indexed).
    pub attempt: u32,
    /// When the job was first enqueued.
    pub enqueued_at: DateTime<Utc>,
}

impl JobEnvelope {
    /// Creates the first attempt of a job.
    #[must_use]
    pub fn new(kind: JobKind) -> Self {
        Self {
            job_id: JobId::generate(),
            kind,
            attempt: 1,
            enqueued_at: Utc::now(),
        }
    }

    /// Returns the uniqueness key of the job.
    #[must_use]
    pub fn unique_key(&self) -> String {
        self.kind.unique_key()
    }

    /// Returns the envelope for the next attempt.
    #[must_use]
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}
