//! Wiring of the engine's components.
//!
//! [`EngineBuilder`] assembles ledger, gateway, applier, synchronizer,
//! dispatcher and reconciliation controller over one storage backend.
//! Every collaborator has a default and can be swapped, which is how tests
//! inject recording fakes.

use std::fmt;
use std::sync::Arc;

use lingo_core::{MemoryBackend, StorageBackend};

use crate::alerts::Alerter;
use crate::applier::MigrationApplier;
use crate::checksum::ChecksumVerifier;
use crate::content::{ContentApplier, StoreContentApplier};
use crate::dispatch::{InMemoryJobQueue, JobQueue};
use crate::dispatcher::JobDispatcher;
use crate::events::{EventSink, LogEventSink};
use crate::gateway::BundleGateway;
use crate::ledger::{Ledger, ObjectStoreLedger};
use crate::manifest::{ManifestSource, StoreManifest};
use crate::reconcile::{ReconcileConfig, ReconciliationController};
use crate::retry::RetryPolicy;
use crate::sync::BundleSynchronizer;
use crate::worker::{JobHandler, MigrationWorker};

/// Builder for [`MigrationEngine`].
pub struct EngineBuilder {
    storage: Arc<dyn StorageBackend>,
    ledger: Option<Arc<dyn Ledger>>,
    content: Option<Arc<dyn ContentApplier>>,
    manifest: Option<Arc<dyn ManifestSource>>,
    queue: Option<Arc<dyn JobQueue>>,
    events: Option<Arc<dyn EventSink>>,
    verifier: ChecksumVerifier,
    alerter: Alerter,
    reconcile: ReconcileConfig,
    policy: RetryPolicy,
}

impl fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("reconcile", &self.reconcile)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }
}

impl EngineBuilder {
    /// Creates a builder over `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            ledger: None,
            content: None,
            manifest: None,
            queue: None,
            events: None,
            verifier: ChecksumVerifier::sha256(),
            alerter: Alerter::log_only(),
            reconcile: ReconcileConfig::default(),
            policy: RetryPolicy::default(),
        }
    }

    /// Sets the ledger. Defaults to an [`ObjectStoreLedger`] over the storage.
    #[must_use]
    pub fn ledger(mut self, ledger: Arc<dyn Ledger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Sets the content applier. Defaults to [`StoreContentApplier`].
    #[must_use]
    pub fn content_applier(mut self, content: Arc<dyn ContentApplier>) -> Self {
        self.content = Some(content);
        self
    }

    /// Sets the manifest source. Defaults to [`StoreManifest`].
    #[must_use]
    pub fn manifest(mut self, manifest: Arc<dyn ManifestSource>) -> Self {
        self.manifest = Some(manifest);
        self
    }

    /// Sets the job queue. Defaults to an [`InMemoryJobQueue`].
    #[must_use]
    pub fn queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Sets the event sink. Defaults to [`LogEventSink`].
    #[must_use]
    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Sets the checksum verifier.
    #[must_use]
    pub fn verifier(mut self, verifier: ChecksumVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    /// Sets the alerter.
    #[must_use]
    pub fn alerter(mut self, alerter: Alerter) -> Self {
        self.alerter = alerter;
        self
    }

    /// Sets the reconciliation settings.
    #[must_use]
    pub fn reconcile_config(mut self, config: ReconcileConfig) -> Self {
        self.reconcile = config;
        self
    }

    /// Sets the retry policy used by workers.
    #[must_use]
    pub const fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Builds the engine.
    #[must_use]
    pub fn build(self) -> MigrationEngine {
        let storage = self.storage;
        let gateway = BundleGateway::new(Arc::clone(&storage));
        let ledger = self
            .ledger
            .unwrap_or_else(|| Arc::new(ObjectStoreLedger::new(Arc::clone(&storage))));
        let content = self
            .content
            .unwrap_or_else(|| Arc::new(StoreContentApplier::new(gateway.clone())));
        let manifest = self
            .manifest
            .unwrap_or_else(|| Arc::new(StoreManifest::new(gateway.clone())));
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(InMemoryJobQueue::default()));
        let events = self.events.unwrap_or_else(|| Arc::new(LogEventSink));

        let applier = MigrationApplier::new(
            Arc::clone(&ledger),
            gateway.clone(),
            content,
            self.verifier.clone(),
        );
        let synchronizer =
            BundleSynchronizer::new(Arc::clone(&ledger), gateway.clone(), self.verifier);
        let dispatcher = JobDispatcher::new(Arc::clone(&queue));
        let handler = JobHandler::new(
            applier.clone(),
            synchronizer.clone(),
            dispatcher.clone(),
            manifest,
            gateway.clone(),
        );
        let controller = Arc::new(ReconciliationController::new(
            self.reconcile,
            storage,
            Arc::clone(&ledger),
            synchronizer.clone(),
            dispatcher.clone(),
            self.alerter,
        ));

        MigrationEngine {
            ledger,
            gateway,
            applier,
            synchronizer,
            dispatcher,
            handler,
            queue,
            events,
            controller,
            policy: self.policy,
        }
    }
}

/// The assembled engine.
#[derive(Clone)]
pub struct MigrationEngine {
    ledger: Arc<dyn Ledger>,
    gateway: BundleGateway,
    applier: MigrationApplier,
    synchronizer: BundleSynchronizer,
    dispatcher: JobDispatcher,
    handler: JobHandler,
    queue: Arc<dyn JobQueue>,
    events: Arc<dyn EventSink>,
    controller: Arc<ReconciliationController>,
    policy: RetryPolicy,
}

impl fmt::Debug for MigrationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationEngine")
            .field("queue", &self.queue.queue_name())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl MigrationEngine {
    /// Starts building an engine over `storage`.
    #[must_use]
    pub fn builder(storage: Arc<dyn StorageBackend>) -> EngineBuilder {
        EngineBuilder::new(storage)
    }

    /// Returns the ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// Returns the bundle gateway.
    #[must_use]
    pub const fn gateway(&self) -> &BundleGateway {
        &self.gateway
    }

    /// Returns the applier.
    #[must_use]
    pub const fn applier(&self) -> &MigrationApplier {
        &self.applier
    }

    /// Returns the synchronizer.
    #[must_use]
    pub const fn synchronizer(&self) -> &BundleSynchronizer {
        &self.synchronizer
    }

    /// Returns the dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &JobDispatcher {
        &self.dispatcher
    }

    /// Returns the job handler.
    #[must_use]
    pub const fn handler(&self) -> &JobHandler {
        &self.handler
    }

    /// Returns the job queue.
    #[must_use]
    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    /// Returns the reconciliation controller.
    #[must_use]
    pub fn controller(&self) -> &Arc<ReconciliationController> {
        &self.controller
    }

    /// Returns the retry policy.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Creates a worker over the engine's queue.
    #[must_use]
    pub fn worker(&self) -> MigrationWorker {
        MigrationWorker::new(
            Arc::clone(&self.queue),
            self.handler.clone(),
            Arc::clone(&self.events),
        )
        .with_policy(self.policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applier::ApplyOptions;
    use crate::record::MigrationStatus;
    use bytes::Bytes;
    use lingo_core::{InterfaceOrigin, WritePrecondition};

    #[tokio::test]
    async fn default_engine_runs_end_to_end_on_object_storage() {
        let storage = Arc::new(MemoryBackend::new());
        storage
            .put(
                "migrations/web_beneficiary/2025-04-01_080000.json",
                Bytes::from(r#"{"title":"Welcome"}"#),
                WritePrecondition::None,
            )
            .await
            .unwrap();
        let engine = MigrationEngine::builder(storage.clone()).build();

        engine
            .dispatcher()
            .dispatch_sync(InterfaceOrigin::WebBeneficiary, false)
            .await
            .unwrap();
        engine.worker().run_until_idle().await.unwrap();

        let record = engine
            .ledger()
            .find_by_filename(InterfaceOrigin::WebBeneficiary, "2025-04-01_080000.json")
            .await
            .unwrap()
            .unwrap();
        engine
            .dispatcher()
            .dispatch_apply(record.id, ApplyOptions::default())
            .await
            .unwrap();
        engine.worker().run_until_idle().await.unwrap();

        let record = engine.ledger().get(record.id).await.unwrap().unwrap();
        assert_eq!(record.status, MigrationStatus::Completed);
        assert!(storage.exists("ledger/records/00000000000000000001.json").await.unwrap());
    }
}
