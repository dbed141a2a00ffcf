//! Recording fakes for the engine's collaborators.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use lingo_core::{InterfaceOrigin, MigrationId};
use lingo_migrate::alerts::AlertChannel;
use lingo_migrate::checksum::{Digester, TranslationBundle};
use lingo_migrate::content::{ApplySummary, ContentApplier};
use lingo_migrate::error::{Error, Result};
use lingo_migrate::ledger::{CommitResult, InMemoryLedger, Ledger, ListFilter, Page};
use lingo_migrate::manifest::ManifestSource;
use lingo_migrate::record::{
    MigrationMetadata, MigrationRecord, MigrationStatus, NewMigration, Transition,
};

/// How an injected content failure behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    /// A storage error; the job layer retries it.
    Transient,
    /// The bundle is rejected; the record is marked failed.
    Reject,
}

impl InjectedFailure {
    fn to_error(self) -> Error {
        match self {
            Self::Transient => Error::storage("injected transient failure"),
            Self::Reject => Error::ContentApply {
                message: "injected rejection".to_string(),
            },
        }
    }
}

#[derive(Debug, Default)]
struct FailurePlan {
    failure: Option<InjectedFailure>,
    remaining: Option<usize>,
}

impl FailurePlan {
    fn take(&mut self) -> Option<InjectedFailure> {
        let failure = self.failure?;
        match self.remaining.as_mut() {
            None => Some(failure),
            Some(0) => None,
            Some(n) => {
                *n -= 1;
                Some(failure)
            }
        }
    }
}

/// Content applier that counts calls and fails on demand.
#[derive(Debug, Clone, Default)]
pub struct RecordingContentApplier {
    applies: Arc<AtomicUsize>,
    restores: Arc<AtomicUsize>,
    applied: Arc<Mutex<Vec<(InterfaceOrigin, TranslationBundle)>>>,
    restored: Arc<Mutex<Vec<(InterfaceOrigin, Bytes)>>>,
    apply_plan: Arc<Mutex<FailurePlan>>,
    restore_plan: Arc<Mutex<FailurePlan>>,
}

impl RecordingContentApplier {
    /// Creates an applier that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every apply call.
    pub fn fail_apply(&self, failure: InjectedFailure) {
        *self.apply_plan.lock().expect("lock") = FailurePlan {
            failure: Some(failure),
            remaining: None,
        };
    }

    /// Fails the next `times` apply calls, then accepts.
    pub fn fail_apply_times(&self, failure: InjectedFailure, times: usize) {
        *self.apply_plan.lock().expect("lock") = FailurePlan {
            failure: Some(failure),
            remaining: Some(times),
        };
    }

    /// Fails every restore call.
    pub fn fail_restore(&self, failure: InjectedFailure) {
        *self.restore_plan.lock().expect("lock") = FailurePlan {
            failure: Some(failure),
            remaining: None,
        };
    }

    /// Returns the number of apply calls, failed ones included.
    #[must_use]
    pub fn apply_calls(&self) -> usize {
        self.applies.load(Ordering::SeqCst)
    }

    /// Returns the number of restore calls, failed ones included.
    #[must_use]
    pub fn restore_calls(&self) -> usize {
        self.restores.load(Ordering::SeqCst)
    }

    /// Returns the bundles accepted, in order.
    #[must_use]
    pub fn applied(&self) -> Vec<(InterfaceOrigin, TranslationBundle)> {
        self.applied.lock().expect("lock").clone()
    }

    /// Returns the backups restored, in order.
    #[must_use]
    pub fn restored(&self) -> Vec<(InterfaceOrigin, Bytes)> {
        self.restored.lock().expect("lock").clone()
    }
}

#[async_trait]
impl ContentApplier for RecordingContentApplier {
    async fn apply(
        &self,
        interface: InterfaceOrigin,
        bundle: &TranslationBundle,
    ) -> Result<ApplySummary> {
        self.applies.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.apply_plan.lock().expect("lock").take() {
            return Err(failure.to_error());
        }
        self.applied
            .lock()
            .expect("lock")
            .push((interface, bundle.clone()));
        Ok(ApplySummary {
            keys_total: bundle.len(),
            keys_added: bundle.len(),
            ..ApplySummary::default()
        })
    }

    async fn restore(&self, interface: InterfaceOrigin, backup: Bytes) -> Result<()> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.restore_plan.lock().expect("lock").take() {
            return Err(failure.to_error());
        }
        self.restored.lock().expect("lock").push((interface, backup));
        Ok(())
    }
}

/// Ledger over an [`InMemoryLedger`] whose commits fail on demand.
#[derive(Debug, Clone)]
pub struct FaultyLedger {
    inner: Arc<InMemoryLedger>,
    commit_faults: Arc<Mutex<Option<(MigrationStatus, usize)>>>,
}

impl FaultyLedger {
    /// Wraps `inner`; nothing fails until asked.
    #[must_use]
    pub fn new(inner: Arc<InMemoryLedger>) -> Self {
        Self {
            inner,
            commit_faults: Arc::default(),
        }
    }

    /// Fails the next `times` commits into `status` with a storage error.
    pub fn fail_commits_to(&self, status: MigrationStatus, times: usize) {
        *self.commit_faults.lock().expect("lock") = Some((status, times));
    }

    fn take_commit_fault(&self, to: MigrationStatus) -> bool {
        let mut faults = self.commit_faults.lock().expect("lock");
        match faults.as_mut() {
            Some((status, remaining)) if *status == to && *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl Ledger for FaultyLedger {
    async fn insert(&self, new: NewMigration) -> Result<MigrationRecord> {
        self.inner.insert(new).await
    }

    async fn get(&self, id: MigrationId) -> Result<Option<MigrationRecord>> {
        self.inner.get(id).await
    }

    async fn find_by_filename(
        &self,
        interface: InterfaceOrigin,
        filename: &str,
    ) -> Result<Option<MigrationRecord>> {
        self.inner.find_by_filename(interface, filename).await
    }

    async fn list(&self, filter: &ListFilter) -> Result<Page<MigrationRecord>> {
        self.inner.list(filter).await
    }

    async fn pending_for_interface(
        &self,
        interface: InterfaceOrigin,
    ) -> Result<Vec<MigrationRecord>> {
        self.inner.pending_for_interface(interface).await
    }

    async fn commit_transition(
        &self,
        id: MigrationId,
        transition: Transition,
    ) -> Result<CommitResult> {
        if self.take_commit_fault(transition.to) {
            return Err(Error::storage("injected ledger failure"));
        }
        self.inner.commit_transition(id, transition).await
    }

    async fn merge_metadata(
        &self,
        id: MigrationId,
        patch: MigrationMetadata,
    ) -> Result<Option<MigrationRecord>> {
        self.inner.merge_metadata(id, patch).await
    }
}

/// Alert channel that keeps every message.
#[derive(Debug, Clone, Default)]
pub struct RecordingAlertChannel {
    messages: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingAlertChannel {
    /// Creates an empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the message texts, in send order.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .expect("lock")
            .iter()
            .map(|(text, _)| text.clone())
            .collect()
    }

    /// Returns the channels messages were sent to.
    #[must_use]
    pub fn channels(&self) -> Vec<String> {
        self.messages
            .lock()
            .expect("lock")
            .iter()
            .map(|(_, channel)| channel.clone())
            .collect()
    }
}

#[async_trait]
impl AlertChannel for RecordingAlertChannel {
    async fn send(&self, message: &str, channel: &str) -> Result<()> {
        self.messages
            .lock()
            .expect("lock")
            .push((message.to_string(), channel.to_string()));
        Ok(())
    }
}

/// Manifest that approves a fixed set of bundles.
#[derive(Debug, Clone, Default)]
pub struct StaticManifest {
    approved: Arc<Mutex<HashSet<(InterfaceOrigin, String)>>>,
}

impl StaticManifest {
    /// Creates a manifest approving nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Approves `filename` for `interface`.
    pub fn approve(&self, interface: InterfaceOrigin, filename: impl Into<String>) {
        self.approved
            .lock()
            .expect("lock")
            .insert((interface, filename.into()));
    }
}

#[async_trait]
impl ManifestSource for StaticManifest {
    async fn is_approved(&self, interface: InterfaceOrigin, filename: &str) -> Result<bool> {
        Ok(self
            .approved
            .lock()
            .expect("lock")
            .contains(&(interface, filename.to_string())))
    }
}

/// Digester returning the same digest for any content.
#[derive(Debug, Clone)]
pub struct StaticDigest(pub String);

impl StaticDigest {
    /// Creates a digester returning `digest`.
    #[must_use]
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }
}

impl Digester for StaticDigest {
    fn digest(&self, _content: &[u8]) -> String {
        self.0.clone()
    }
}
