//! In-memory ledger implementation for testing and debug mode.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No persistence
//! - **Single-process only**: Records are not visible across processes

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use lingo_core::{InterfaceOrigin, MigrationId};

use super::{CommitResult, Ledger, ListFilter, Page, ensure_allowed};
use crate::error::{Error, Result};
use crate::record::{
    MigrationMetadata, MigrationRecord, MigrationStatus, NewMigration, Transition, transition,
};

#[derive(Debug, Default)]
struct LedgerState {
    records: BTreeMap<MigrationId, MigrationRecord>,
    by_key: HashMap<(InterfaceOrigin, String), MigrationId>,
    last_id: u64,
    last_batch: u64,
}

/// In-memory migration ledger.
///
/// All operations take a single lock, so compare-and-swap is trivially atomic.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: RwLock<LedgerState>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("ledger lock poisoned")
}

impl InMemoryLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record as-is, keeping its ID and status.
    ///
    /// For seeding tests and fixtures.
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateRecord` if the bundle is already recorded.
    pub fn seed(&self, record: MigrationRecord) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        let key = (record.interface_origin, record.filename.clone());
        if state.by_key.contains_key(&key) || state.records.contains_key(&record.id) {
            return Err(Error::DuplicateRecord {
                interface: record.interface_origin,
                filename: record.filename,
            });
        }
        state.last_id = state.last_id.max(record.id.get());
        if let Some(batch) = record.batch_number {
            state.last_batch = state.last_batch.max(batch);
        }
        state.by_key.insert(key, record.id);
        state.records.insert(record.id, record);
        drop(state);
        Ok(())
    }

    /// Returns every record, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn snapshot(&self) -> Result<Vec<MigrationRecord>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.records.values().cloned().collect())
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn insert(&self, new: NewMigration) -> Result<MigrationRecord> {
        let mut state = self.state.write().map_err(poison_err)?;

        let key = (new.interface_origin, new.filename.clone());
        if state.by_key.contains_key(&key) {
            return Err(Error::DuplicateRecord {
                interface: new.interface_origin,
                filename: new.filename,
            });
        }

        state.last_id += 1;
        let id = MigrationId::new(state.last_id);
        let record = MigrationRecord::new_pending(id, new, Utc::now());
        state.by_key.insert(key, id);
        state.records.insert(id, record.clone());
        drop(state);

        Ok(record)
    }

    async fn get(&self, id: MigrationId) -> Result<Option<MigrationRecord>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.records.get(&id).cloned())
    }

    async fn find_by_filename(
        &self,
        interface: InterfaceOrigin,
        filename: &str,
    ) -> Result<Option<MigrationRecord>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state
            .by_key
            .get(&(interface, filename.to_string()))
            .and_then(|id| state.records.get(id))
            .cloned())
    }

    async fn list(&self, filter: &ListFilter) -> Result<Page<MigrationRecord>> {
        let state = self.state.read().map_err(poison_err)?;
        let matching: Vec<_> = state
            .records
            .values()
            .rev()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        drop(state);
        Ok(filter.paginate(matching))
    }

    async fn pending_for_interface(
        &self,
        interface: InterfaceOrigin,
    ) -> Result<Vec<MigrationRecord>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state
            .records
            .values()
            .filter(|r| r.interface_origin == interface && r.status == MigrationStatus::Pending)
            .cloned()
            .collect())
    }

    async fn commit_transition(
        &self,
        id: MigrationId,
        change: Transition,
    ) -> Result<CommitResult> {
        ensure_allowed(&change)?;
        let mut state = self.state.write().map_err(poison_err)?;

        let Some(current) = state.records.get(&id) else {
            return Ok(CommitResult::NotFound);
        };
        if current.status != change.from {
            return Ok(CommitResult::StateMismatch {
                actual: current.status,
            });
        }

        let mut next = transition(current, change.to, change.patch, change.at)?;
        if change.to == MigrationStatus::Completed {
            state.last_batch += 1;
            next.batch_number = Some(state.last_batch);
        }
        state.records.insert(id, next.clone());
        drop(state);

        Ok(CommitResult::Committed(next))
    }

    async fn merge_metadata(
        &self,
        id: MigrationId,
        patch: MigrationMetadata,
    ) -> Result<Option<MigrationRecord>> {
        let mut state = self.state.write().map_err(poison_err)?;
        let Some(record) = state.records.get_mut(&id) else {
            return Ok(None);
        };
        record.metadata.merge(patch);
        record.updated_at = Utc::now();
        let updated = record.clone();
        drop(state);
        Ok(Some(updated))
    }
}
