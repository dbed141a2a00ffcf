//! Migration ledger persisted in the object store.
//!
//! Layout:
//!
//! ```text
//! ledger/counters/migration_id.json      last assigned record ID
//! ledger/counters/batch.json             last assigned batch number
//! ledger/records/{id:020}.json           one record per object
//! ledger/index/{interface}/{filename}    record ID for a bundle
//! ```
//!
//! Every mutation is a conditional write:
//!
//! - counters advance with a `MatchesVersion` write and retry on conflict
//! - the index entry is created with `DoesNotExist`, which is what makes
//!   `(interface, filename)` unique
//! - record updates read the version *first*, then the contents, and write
//!   with `MatchesVersion`, so a status transition is a true compare-and-swap
//!
//! IDs burned by a lost race leave gaps. They stay monotonic.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use lingo_core::{InterfaceOrigin, MigrationId, StorageBackend, WritePrecondition, WriteResult};

use super::{CommitResult, Ledger, ListFilter, Page, ensure_allowed};
use crate::error::{Error, Result};
use crate::record::{
    MigrationMetadata, MigrationRecord, MigrationStatus, NewMigration, Transition, transition,
};

const RECORDS_PREFIX: &str = "ledger/records/";
const ID_COUNTER: &str = "ledger/counters/migration_id.json";
const BATCH_COUNTER: &str = "ledger/counters/batch.json";

/// Conditional-write attempts before contention is reported as a storage error.
const MAX_CAS_RETRIES: u32 = 16;

#[derive(Debug, Serialize, Deserialize)]
struct Counter {
    value: u64,
}

/// Ledger backed by any [`StorageBackend`].
#[derive(Clone)]
pub struct ObjectStoreLedger {
    storage: Arc<dyn StorageBackend>,
}

impl fmt::Debug for ObjectStoreLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreLedger").finish_non_exhaustive()
    }
}

fn record_path(id: MigrationId) -> String {
    format!("{RECORDS_PREFIX}{:020}.json", id.get())
}

fn index_path(interface: InterfaceOrigin, filename: &str) -> String {
    format!("ledger/index/{interface}/{filename}")
}

fn contention(path: &str) -> Error {
    Error::storage(format!(
        "gave up on {path} after {MAX_CAS_RETRIES} conflicting writes"
    ))
}

impl ObjectStoreLedger {
    /// Creates a ledger over `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    async fn next_value(&self, path: &str) -> Result<u64> {
        for _ in 0..MAX_CAS_RETRIES {
            let (next, precondition) = match self.storage.head(path).await? {
                None => (1, WritePrecondition::DoesNotExist),
                Some(meta) => {
                    let current: Counter = serde_json::from_slice(&self.storage.get(path).await?)?;
                    (
                        current.value.saturating_add(1),
                        WritePrecondition::MatchesVersion(meta.version),
                    )
                }
            };

            let body = Bytes::from(serde_json::to_vec(&Counter { value: next })?);
            match self.storage.put(path, body, precondition).await? {
                WriteResult::Success { .. } => return Ok(next),
                WriteResult::PreconditionFailed { .. } => {}
            }
        }
        Err(contention(path))
    }

    async fn read_versioned(&self, id: MigrationId) -> Result<Option<(MigrationRecord, String)>> {
        let path = record_path(id);
        let Some(meta) = self.storage.head(&path).await? else {
            return Ok(None);
        };
        match self.storage.get(&path).await {
            Ok(bytes) => Ok(Some((serde_json::from_slice(&bytes)?, meta.version))),
            Err(lingo_core::Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_record(
        &self,
        record: &MigrationRecord,
        precondition: WritePrecondition,
    ) -> Result<bool> {
        let body = Bytes::from(serde_json::to_vec(record)?);
        match self
            .storage
            .put(&record_path(record.id), body, precondition)
            .await?
        {
            WriteResult::Success { .. } => Ok(true),
            WriteResult::PreconditionFailed { .. } => Ok(false),
        }
    }

    async fn indexed_id(
        &self,
        interface: InterfaceOrigin,
        filename: &str,
    ) -> Result<Option<MigrationId>> {
        match self.storage.get(&index_path(interface, filename)).await {
            Ok(bytes) => {
                let raw = std::str::from_utf8(&bytes)
                    .map_err(|e| Error::serialization(format!("index entry: {e}")))?;
                Ok(Some(raw.parse()?))
            }
            Err(lingo_core::Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Finishes an insert whose index entry exists but whose record was never
    /// written (a writer crashed in between). The first writer to create the
    /// record wins; everyone else sees a duplicate.
    async fn claim_indexed(&self, id: MigrationId, new: NewMigration) -> Result<MigrationRecord> {
        let interface = new.interface_origin;
        let filename = new.filename.clone();
        let record = MigrationRecord::new_pending(id, new, Utc::now());
        if self.write_record(&record, WritePrecondition::DoesNotExist).await? {
            tracing::warn!(
                migration_id = %id,
                interface = %interface,
                filename = %filename,
                "repaired orphaned ledger index entry"
            );
            return Ok(record);
        }
        Err(Error::DuplicateRecord {
            interface,
            filename,
        })
    }

    async fn all_records(&self) -> Result<Vec<MigrationRecord>> {
        let mut metas = self.storage.list(RECORDS_PREFIX).await?;
        metas.sort_by(|a, b| a.path.cmp(&b.path));

        let mut records = Vec::with_capacity(metas.len());
        for meta in metas {
            match self.storage.get(&meta.path).await {
                Ok(bytes) => records.push(serde_json::from_slice::<MigrationRecord>(&bytes)?),
                Err(lingo_core::Error::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl Ledger for ObjectStoreLedger {
    async fn insert(&self, new: NewMigration) -> Result<MigrationRecord> {
        let interface = new.interface_origin;
        let index = index_path(interface, &new.filename);

        if let Some(existing) = self.indexed_id(interface, &new.filename).await? {
            if self.storage.exists(&record_path(existing)).await? {
                return Err(Error::DuplicateRecord {
                    interface,
                    filename: new.filename,
                });
            }
            return self.claim_indexed(existing, new).await;
        }

        let id = MigrationId::new(self.next_value(ID_COUNTER).await?);
        let body = Bytes::from(id.to_string());
        match self
            .storage
            .put(&index, body, WritePrecondition::DoesNotExist)
            .await?
        {
            WriteResult::Success { .. } => {}
            WriteResult::PreconditionFailed { .. } => {
                // Lost the race for this bundle.
                return match self.indexed_id(interface, &new.filename).await? {
                    Some(winner) if !self.storage.exists(&record_path(winner)).await? => {
                        self.claim_indexed(winner, new).await
                    }
                    _ => Err(Error::DuplicateRecord {
                        interface,
                        filename: new.filename,
                    }),
                };
            }
        }

        let record = MigrationRecord::new_pending(id, new, Utc::now());
        if !self.write_record(&record, WritePrecondition::DoesNotExist).await? {
            // A concurrent insert took our index entry for an orphan and
            // created the record first.
            return Err(Error::DuplicateRecord {
                interface,
                filename: record.filename,
            });
        }
        Ok(record)
    }

    async fn get(&self, id: MigrationId) -> Result<Option<MigrationRecord>> {
        Ok(self.read_versioned(id).await?.map(|(record, _)| record))
    }

    async fn find_by_filename(
        &self,
        interface: InterfaceOrigin,
        filename: &str,
    ) -> Result<Option<MigrationRecord>> {
        match self.indexed_id(interface, filename).await? {
            Some(id) => self.get(id).await,
            None => Ok(None),
        }
    }

    async fn list(&self, filter: &ListFilter) -> Result<Page<MigrationRecord>> {
        let mut records: Vec<_> = self
            .all_records()
            .await?
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        records.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(filter.paginate(records))
    }

    async fn pending_for_interface(
        &self,
        interface: InterfaceOrigin,
    ) -> Result<Vec<MigrationRecord>> {
        let mut records: Vec<_> = self
            .all_records()
            .await?
            .into_iter()
            .filter(|r| r.interface_origin == interface && r.status == MigrationStatus::Pending)
            .collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn commit_transition(
        &self,
        id: MigrationId,
        change: Transition,
    ) -> Result<CommitResult> {
        ensure_allowed(&change)?;
        let mut batch = None;

        for _ in 0..MAX_CAS_RETRIES {
            let Some((current, version)) = self.read_versioned(id).await? else {
                return Ok(CommitResult::NotFound);
            };
            if current.status != change.from {
                return Ok(CommitResult::StateMismatch {
                    actual: current.status,
                });
            }

            let mut next = transition(&current, change.to, change.patch.clone(), change.at)?;
            if change.to == MigrationStatus::Completed {
                let number = match batch {
                    Some(number) => number,
                    None => self.next_value(BATCH_COUNTER).await?,
                };
                batch = Some(number);
                next.batch_number = Some(number);
            }

            if self
                .write_record(&next, WritePrecondition::MatchesVersion(version))
                .await?
            {
                return Ok(CommitResult::Committed(next));
            }
        }
        Err(contention(&record_path(id)))
    }

    async fn merge_metadata(
        &self,
        id: MigrationId,
        patch: MigrationMetadata,
    ) -> Result<Option<MigrationRecord>> {
        for _ in 0..MAX_CAS_RETRIES {
            let Some((mut record, version)) = self.read_versioned(id).await? else {
                return Ok(None);
            };
            record.metadata.merge(patch.clone());
            record.updated_at = Utc::now();

            if self
                .write_record(&record, WritePrecondition::MatchesVersion(version))
                .await?
            {
                return Ok(Some(record));
            }
        }
        Err(contention(&record_path(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lingo_core::MemoryBackend;

    fn ledger() -> (Arc<MemoryBackend>, ObjectStoreLedger) {
        let storage = Arc::new(MemoryBackend::new());
        (Arc::clone(&storage), ObjectStoreLedger::new(storage))
    }

    fn new_migration(filename: &str) -> NewMigration {
        NewMigration {
            interface_origin: InterfaceOrigin::Mobile,
            filename: filename.into(),
            version: "2025-01-01_000000".into(),
            checksum: "abc123".into(),
            metadata: MigrationMetadata::new(),
        }
    }

    #[tokio::test]
    async fn insert_and_get_roundtrip() {
        let (_, ledger) = ledger();
        let created = ledger.insert(new_migration("a.json")).await.unwrap();
        assert_eq!(created.id, MigrationId::new(1));

        let fetched = ledger.get(created.id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert!(ledger.exists(InterfaceOrigin::Mobile, "a.json").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_bundle_is_rejected() {
        let (_, ledger) = ledger();
        ledger.insert(new_migration("a.json")).await.unwrap();
        let err = ledger.insert(new_migration("a.json")).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateRecord { .. }));
    }

    #[tokio::test]
    async fn concurrent_inserts_create_one_record() {
        let (_, ledger) = ledger();
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.insert(new_migration("race.json")).await })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(Error::DuplicateRecord { .. }) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(ledger.list(&ListFilter::default()).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn orphaned_index_entry_is_repaired() {
        let (storage, ledger) = ledger();
        storage
            .put(
                &index_path(InterfaceOrigin::Mobile, "a.json"),
                Bytes::from("7"),
                WritePrecondition::None,
            )
            .await
            .unwrap();

        let record = ledger.insert(new_migration("a.json")).await.unwrap();
        assert_eq!(record.id, MigrationId::new(7));
        let err = ledger.insert(new_migration("a.json")).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateRecord { .. }));
    }

    #[tokio::test]
    async fn transitions_are_compare_and_swap() {
        let (_, ledger) = ledger();
        let record = ledger.insert(new_migration("a.json")).await.unwrap();
        let change = Transition::new(
            MigrationStatus::Pending,
            MigrationStatus::Completed,
            MigrationMetadata::new(),
        );

        let CommitResult::Committed(done) =
            ledger.commit_transition(record.id, change.clone()).await.unwrap()
        else {
            panic!("expected commit");
        };
        assert_eq!(done.batch_number, Some(1));

        let again = ledger.commit_transition(record.id, change).await.unwrap();
        assert_eq!(
            again,
            CommitResult::StateMismatch {
                actual: MigrationStatus::Completed
            }
        );
        assert_eq!(
            ledger.get(record.id).await.unwrap().unwrap().status,
            MigrationStatus::Completed
        );
    }

    #[tokio::test]
    async fn pending_is_oldest_first_and_filtered() {
        let (_, ledger) = ledger();
        let a = ledger.insert(new_migration("a.json")).await.unwrap();
        let b = ledger.insert(new_migration("b.json")).await.unwrap();
        ledger
            .commit_transition(
                a.id,
                Transition::new(
                    MigrationStatus::Pending,
                    MigrationStatus::Failed,
                    MigrationMetadata::new(),
                ),
            )
            .await
            .unwrap();
        let c = ledger.insert(new_migration("c.json")).await.unwrap();

        let pending = ledger.pending_for_interface(InterfaceOrigin::Mobile).await.unwrap();
        let ids: Vec<_> = pending.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![b.id, c.id]);
    }
}
