//! Migration lifecycle events.
//!
//! The applier never publishes anything itself. It returns a
//! [`crate::applier::MigrationOutcome`]; the job layer turns that into a
//! [`MigrationEvent`] and hands it to whatever [`EventSink`] is configured.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lingo_core::{InterfaceOrigin, MigrationId};

use crate::content::ApplySummary;

/// Something that happened to a migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MigrationEvent {
    /// A bundle was applied.
    Applied {
        /// The record.
        migration_id: MigrationId,
        /// Target interface.
        interface: InterfaceOrigin,
        /// Bundle filename.
        filename: String,
        /// Backup written before the apply.
        backup_path: Option<String>,
        /// Key counts.
        summary: ApplySummary,
        /// When it happened.
        at: DateTime<Utc>,
    },
    /// A bundle failed to apply.
    Failed {
        /// The record.
        migration_id: MigrationId,
        /// Target interface.
        interface: InterfaceOrigin,
        /// Bundle filename.
        filename: String,
        /// Error text.
        error: String,
        /// When it happened.
        at: DateTime<Utc>,
    },
    /// A bundle was rolled back.
    RolledBack {
        /// The record.
        migration_id: MigrationId,
        /// Target interface.
        interface: InterfaceOrigin,
        /// Bundle filename.
        filename: String,
        /// Operator-supplied reason.
        reason: String,
        /// When it happened.
        at: DateTime<Utc>,
    },
    /// A rollback attempt failed; the record is still completed.
    RollbackFailed {
        /// The record.
        migration_id: MigrationId,
        /// Target interface.
        interface: InterfaceOrigin,
        /// Bundle filename.
        filename: String,
        /// Error text.
        error: String,
        /// When it happened.
        at: DateTime<Utc>,
    },
}

impl MigrationEvent {
    /// Returns the event type label.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "migration_applied",
            Self::Failed { .. } => "migration_failed",
            Self::RolledBack { .. } => "migration_rolled_back",
            Self::RollbackFailed { .. } => "migration_rollback_failed",
        }
    }

    /// Returns the migration the event is about.
    #[must_use]
    pub const fn migration_id(&self) -> MigrationId {
        match self {
            Self::Applied { migration_id, .. }
            | Self::Failed { migration_id, .. }
            | Self::RolledBack { migration_id, .. }
            | Self::RollbackFailed { migration_id, .. } => *migration_id,
        }
    }
}

/// Receives migration events.
pub trait EventSink: Send + Sync {
    /// Publishes an event. Must not fail the caller.
    fn publish(&self, event: MigrationEvent);
}

/// Event sink that writes events to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn publish(&self, event: MigrationEvent) {
        match &event {
            MigrationEvent::Failed { error, .. } | MigrationEvent::RollbackFailed { error, .. } => {
                tracing::warn!(
                    event_type = event.event_type(),
                    migration_id = %event.migration_id(),
                    error = %error,
                    "migration event"
                );
            }
            MigrationEvent::Applied { .. } | MigrationEvent::RolledBack { .. } => {
                tracing::info!(
                    event_type = event.event_type(),
                    migration_id = %event.migration_id(),
                    "migration event"
                );
            }
        }
    }
}

/// In-memory sink collecting events in publish order.
#[derive(Debug, Default)]
pub struct InMemoryEventSink {
    events: Mutex<Vec<MigrationEvent>>,
}

impl InMemoryEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<MigrationEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventSink for InMemoryEventSink {
    fn publish(&self, event: MigrationEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
