//! The migration ledger: durable records and their status transitions.
//!
//! ## Design Principles
//!
//! - **Uniqueness**: at most one record per `(interface, filename)`
//! - **CAS semantics**: every status change is a compare-and-swap on `status`
//!   that merges its metadata patch in the same write
//! - **Audit trail**: records are never deleted and metadata is never cleared
//!
//! [`InMemoryLedger`] serves tests and debug mode; [`ObjectStoreLedger`]
//! persists records in the object store using conditional writes.

pub mod memory;
pub mod object_store;

use async_trait::async_trait;

use lingo_core::{InterfaceOrigin, MigrationId};

use crate::error::Result;
use crate::record::{MigrationMetadata, MigrationRecord, MigrationStatus, NewMigration, Transition};

pub use memory::InMemoryLedger;
pub use object_store::ObjectStoreLedger;

/// Default page size for listings.
pub const DEFAULT_PER_PAGE: u32 = 15;

/// Largest page size accepted for listings.
pub const MAX_PER_PAGE: u32 = 100;

/// Result of a compare-and-swap status transition.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitResult {
    /// The transition was applied. Carries the new record.
    Committed(MigrationRecord),
    /// The record does not exist.
    NotFound,
    /// The record was not in the expected status.
    StateMismatch {
        /// The status that was found.
        actual: MigrationStatus,
    },
}

impl CommitResult {
    /// Returns true if the transition was applied.
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

/// Filter and pagination for [`Ledger::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListFilter {
    /// Only records for this interface.
    pub interface: Option<InterfaceOrigin>,
    /// Only records in this status.
    pub status: Option<MigrationStatus>,
    /// 1-based page number.
    pub page: u32,
    /// Records per page.
    pub per_page: u32,
}

impl Default for ListFilter {
    fn default() -> Self {
        Self {
            interface: None,
            status: None,
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl ListFilter {
    /// Returns true if `record` passes the filter.
    #[must_use]
    pub fn matches(&self, record: &MigrationRecord) -> bool {
        self.interface.is_none_or(|i| i == record.interface_origin)
            && self.status.is_none_or(|s| s == record.status)
    }

    /// Cuts one page out of `records`, which must already be filtered and sorted.
    #[must_use]
    pub fn paginate(&self, records: Vec<MigrationRecord>) -> Page<MigrationRecord> {
        let per_page = self.per_page.clamp(1, MAX_PER_PAGE);
        let page = self.page.max(1);
        let total = records.len();
        let skip = usize::try_from(u64::from(page - 1) * u64::from(per_page)).unwrap_or(usize::MAX);
        let items = records
            .into_iter()
            .skip(skip)
            .take(per_page as usize)
            .collect();
        Page {
            items,
            total,
            page,
            per_page,
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Items across all pages.
    pub total: usize,
    /// 1-based page number.
    pub page: u32,
    /// Page size used.
    pub per_page: u32,
}

impl<T> Page<T> {
    /// Returns the last page number (at least 1).
    #[must_use]
    pub fn last_page(&self) -> u32 {
        let pages = self.total.div_ceil(self.per_page.max(1) as usize).max(1);
        u32::try_from(pages).unwrap_or(u32::MAX)
    }
}

/// Storage abstraction for migration records.
///
/// Records are listed newest first; [`Ledger::pending_for_interface`]
/// returns oldest first so bundles apply in discovery order.
///
/// ## Thread Safety
///
/// All methods take `&self` and may be called from many workers at once.
/// [`Ledger::commit_transition`] is the only way `status` changes.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Creates a pending record.
    ///
    /// Fails with `Error::DuplicateRecord` if the `(interface, filename)`
    /// pair is already recorded.
    async fn insert(&self, new: NewMigration) -> Result<MigrationRecord>;

    /// Gets a record by ID.
    async fn get(&self, id: MigrationId) -> Result<Option<MigrationRecord>>;

    /// Gets the record for a bundle, if discovered.
    async fn find_by_filename(
        &self,
        interface: InterfaceOrigin,
        filename: &str,
    ) -> Result<Option<MigrationRecord>>;

    /// Lists records, newest first.
    async fn list(&self, filter: &ListFilter) -> Result<Page<MigrationRecord>>;

    /// Returns pending records for `interface`, oldest first.
    async fn pending_for_interface(
        &self,
        interface: InterfaceOrigin,
    ) -> Result<Vec<MigrationRecord>>;

    /// Atomically moves a record from `transition.from` to `transition.to`,
    /// merging `transition.patch` in the same write.
    ///
    /// Completing a record assigns the next batch number.
    ///
    /// # Returns
    ///
    /// - `CommitResult::Committed` with the new record
    /// - `CommitResult::NotFound` if the record doesn't exist
    /// - `CommitResult::StateMismatch` if the status is not `transition.from`
    ///
    /// Returns `Error::InvalidTransition` if the pair is not allowed at all.
    async fn commit_transition(&self, id: MigrationId, transition: Transition)
    -> Result<CommitResult>;

    /// Merges metadata without changing status.
    ///
    /// Returns `None` if the record doesn't exist.
    async fn merge_metadata(
        &self,
        id: MigrationId,
        patch: MigrationMetadata,
    ) -> Result<Option<MigrationRecord>>;

    /// Returns true if a record exists for the bundle.
    async fn exists(&self, interface: InterfaceOrigin, filename: &str) -> Result<bool> {
        Ok(self.find_by_filename(interface, filename).await?.is_some())
    }
}

/// Rejects pairs that are never allowed, before any record is read.
pub(crate) fn ensure_allowed(transition: &Transition) -> Result<()> {
    if transition.from.can_transition_to(transition.to) {
        Ok(())
    } else {
        Err(crate::error::Error::InvalidTransition {
            from: transition.from,
            to: transition.to,
        })
    }
}
