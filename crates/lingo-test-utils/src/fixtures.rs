//! Test fixtures: an engine wired to recording fakes, plus record factories.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;

use lingo_core::{
    BundlePaths, Environment, InterfaceOrigin, MigrationId, StorageBackend, WritePrecondition,
};
use lingo_migrate::alerts::Alerter;
use lingo_migrate::applier::ApplyOptions;
use lingo_migrate::checksum::ChecksumVerifier;
use lingo_migrate::dispatch::InMemoryJobQueue;
use lingo_migrate::engine::MigrationEngine;
use lingo_migrate::events::InMemoryEventSink;
use lingo_migrate::ledger::{InMemoryLedger, Ledger};
use lingo_migrate::reconcile::ReconcileConfig;
use lingo_migrate::record::{MigrationMetadata, MigrationRecord, NewMigration};
use lingo_migrate::retry::RetryPolicy;
use lingo_migrate::sync::DiscoveryContext;

use crate::fakes::{FaultyLedger, RecordingAlertChannel, RecordingContentApplier, StaticManifest};
use crate::storage::TracingMemoryBackend;

/// Alert channel name used by test engines.
pub const TEST_ALERT_CHANNEL: &str = "translations";

/// Builder for [`TestContext`].
#[derive(Debug, Clone)]
pub struct TestContextBuilder {
    config: ReconcileConfig,
    verifier: ChecksumVerifier,
    policy: RetryPolicy,
    queue_capacity: Option<usize>,
}

impl Default for TestContextBuilder {
    fn default() -> Self {
        Self {
            config: ReconcileConfig {
                environment: Environment::Dev,
                ..ReconcileConfig::default()
            },
            verifier: ChecksumVerifier::sha256(),
            policy: RetryPolicy::default(),
            queue_capacity: None,
        }
    }
}

impl TestContextBuilder {
    /// Sets the environment.
    #[must_use]
    pub fn environment(mut self, environment: Environment) -> Self {
        self.config.environment = environment;
        self
    }

    /// Sets the reconciliation throttle.
    #[must_use]
    pub fn throttle(mut self, throttle: Duration) -> Self {
        self.config.throttle = throttle;
        self
    }

    /// Turns the operator auto-sync switch on or off.
    #[must_use]
    pub fn auto_sync(mut self, enabled: bool) -> Self {
        self.config.auto_sync_enabled = enabled;
        self
    }

    /// Restricts reconciliation to `interfaces`.
    #[must_use]
    pub fn interfaces(mut self, interfaces: Vec<InterfaceOrigin>) -> Self {
        self.config.interfaces = interfaces;
        self
    }

    /// Sets the checksum verifier.
    #[must_use]
    pub fn verifier(mut self, verifier: ChecksumVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    /// Sets the worker retry policy.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Bounds the job queue to `capacity` waiting jobs.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Builds the context.
    #[must_use]
    pub fn build(self) -> TestContext {
        let storage = Arc::new(TracingMemoryBackend::new());
        let ledger = Arc::new(InMemoryLedger::new());
        let ledger_faults = FaultyLedger::new(ledger.clone());
        let content = RecordingContentApplier::new();
        let alerts = RecordingAlertChannel::new();
        let manifest = StaticManifest::new();
        let events = Arc::new(InMemoryEventSink::new());
        let queue = Arc::new(match self.queue_capacity {
            Some(capacity) => InMemoryJobQueue::with_capacity("translation-migrations", capacity),
            None => InMemoryJobQueue::default(),
        });

        let engine = MigrationEngine::builder(storage.clone())
            .ledger(Arc::new(ledger_faults.clone()))
            .content_applier(Arc::new(content.clone()))
            .manifest(Arc::new(manifest.clone()))
            .queue(queue.clone())
            .events(events.clone())
            .verifier(self.verifier)
            .alerter(Alerter::new(Arc::new(alerts.clone()), TEST_ALERT_CHANNEL))
            .reconcile_config(self.config)
            .retry_policy(self.policy)
            .build();

        TestContext {
            storage,
            ledger,
            ledger_faults,
            content,
            alerts,
            manifest,
            events,
            queue,
            engine,
        }
    }
}

/// An engine over in-memory storage with every collaborator observable.
#[derive(Debug)]
pub struct TestContext {
    /// Object storage with operation tracing.
    pub storage: Arc<TracingMemoryBackend>,
    /// The ledger the engine writes to.
    pub ledger: Arc<InMemoryLedger>,
    /// Fault injection in front of `ledger`; the engine goes through it.
    pub ledger_faults: FaultyLedger,
    /// Content applier fake.
    pub content: RecordingContentApplier,
    /// Alert channel fake.
    pub alerts: RecordingAlertChannel,
    /// Manifest fake.
    pub manifest: StaticManifest,
    /// Published events.
    pub events: Arc<InMemoryEventSink>,
    /// The job queue.
    pub queue: Arc<InMemoryJobQueue>,
    /// The engine under test.
    pub engine: MigrationEngine,
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TestContext {
    /// Creates a context for the `dev` environment.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building a context.
    #[must_use]
    pub fn builder() -> TestContextBuilder {
        TestContextBuilder::default()
    }

    /// Writes a bundle to storage and returns its path.
    pub async fn put_bundle(
        &self,
        interface: InterfaceOrigin,
        filename: &str,
        body: &str,
    ) -> String {
        let path = BundlePaths::new(interface)
            .bundle(filename)
            .expect("valid bundle filename");
        self.put_object(&path, body).await;
        path
    }

    /// Writes an arbitrary object to storage.
    pub async fn put_object(&self, path: &str, body: &str) {
        self.storage
            .put(path, Bytes::from(body.to_string()), WritePrecondition::None)
            .await
            .expect("put object");
    }

    /// Writes a bundle and discovers it. Returns the pending record.
    pub async fn seed_pending(
        &self,
        interface: InterfaceOrigin,
        filename: &str,
        body: &str,
    ) -> MigrationRecord {
        self.put_bundle(interface, filename, body).await;
        self.engine
            .synchronizer()
            .sync_interface(interface, &DiscoveryContext::manual(false))
            .await
            .expect("sync");
        self.engine
            .ledger()
            .find_by_filename(interface, filename)
            .await
            .expect("lookup")
            .expect("record created")
    }

    /// Writes, discovers and applies a bundle. Returns the completed record.
    pub async fn seed_completed(
        &self,
        interface: InterfaceOrigin,
        filename: &str,
        body: &str,
    ) -> MigrationRecord {
        let record = self.seed_pending(interface, filename, body).await;
        self.engine
            .applier()
            .apply(record.id, ApplyOptions::default())
            .await
            .expect("apply");
        self.record(record.id).await
    }

    /// Loads a record that must exist.
    pub async fn record(&self, id: MigrationId) -> MigrationRecord {
        self.engine
            .ledger()
            .get(id)
            .await
            .expect("get")
            .expect("record exists")
    }

    /// Runs queued jobs until none is visible. Returns how many ran.
    pub async fn drain(&self) -> usize {
        self.engine.worker().run_until_idle().await.expect("worker")
    }

    /// Runs queued jobs, waiting out retry delays, until the queue is empty.
    pub async fn drain_all(&self) -> usize {
        self.engine.worker().run_until_empty().await.expect("worker")
    }
}

/// Builds a pending record without touching storage.
#[must_use]
pub fn pending_record(id: u64, interface: InterfaceOrigin, filename: &str) -> MigrationRecord {
    MigrationRecord::new_pending(
        MigrationId::new(id),
        NewMigration {
            interface_origin: interface,
            filename: filename.to_string(),
            version: filename.trim_end_matches(".json").to_string(),
            checksum: "abc123".to_string(),
            metadata: MigrationMetadata::new(),
        },
        Utc::now(),
    )
}

/// Sample bundle body with `count` keys.
#[must_use]
pub fn sample_bundle(count: usize) -> String {
    let entries: serde_json::Map<String, serde_json::Value> = (0..count)
        .map(|i| (format!("key_{i}"), serde_json::Value::String(format!("value {i}"))))
        .collect();
    serde_json::Value::Object(entries).to_string()
}
