//! Job execution.
//!
//! [`JobHandler`] runs one job kind against the applier and synchronizer.
//! [`MigrationWorker`] pulls jobs off a [`JobQueue`], applies the retry
//! policy, publishes outcomes, and runs the exhaustion handler when a job
//! runs out of attempts.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::Instrument as _;

use lingo_core::{Environment, InterfaceOrigin, MigrationId};

use crate::applier::{ApplyOptions, MigrationApplier, MigrationOutcome};
use crate::dispatch::{JobQueue, Reservation};
use crate::dispatcher::JobDispatcher;
use crate::error::{Error, Result};
use crate::events::EventSink;
use crate::gateway::BundleGateway;
use crate::job::JobKind;
use crate::ledger::{CommitResult, Ledger};
use crate::manifest::ManifestSource;
use crate::metrics::MigrateMetrics;
use crate::record::{MigrationMetadata, MigrationStatus, Transition};
use crate::retry::RetryPolicy;
use crate::sync::{BundleSynchronizer, DiscoveryContext, SyncReport};

/// Default interval between queue polls when idle.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What a job produced.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutput {
    /// An apply or rollback ran.
    Migration(MigrationOutcome),
    /// Discovery ran.
    Synced {
        /// Discovery result.
        report: SyncReport,
        /// Apply jobs enqueued afterwards.
        dispatched: usize,
    },
    /// Pending records were processed under environment policy.
    AutoProcessed {
        /// Interface processed.
        interface: InterfaceOrigin,
        /// Apply jobs enqueued.
        dispatched: usize,
        /// Records left pending because the manifest does not list them.
        skipped_unapproved: usize,
    },
}

/// Executes job kinds.
#[derive(Clone)]
pub struct JobHandler {
    applier: MigrationApplier,
    synchronizer: BundleSynchronizer,
    dispatcher: JobDispatcher,
    manifest: Arc<dyn ManifestSource>,
    gateway: BundleGateway,
}

impl fmt::Debug for JobHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandler").finish_non_exhaustive()
    }
}

impl JobHandler {
    /// Creates a handler.
    #[must_use]
    pub fn new(
        applier: MigrationApplier,
        synchronizer: BundleSynchronizer,
        dispatcher: JobDispatcher,
        manifest: Arc<dyn ManifestSource>,
        gateway: BundleGateway,
    ) -> Self {
        Self {
            applier,
            synchronizer,
            dispatcher,
            manifest,
            gateway,
        }
    }

    fn ledger(&self) -> &Arc<dyn Ledger> {
        self.applier.ledger()
    }

    /// Runs one attempt of `kind`.
    ///
    /// # Errors
    ///
    /// Returns the applier's or synchronizer's error unchanged; the caller
    /// decides whether to retry from [`Error::is_retryable`].
    pub async fn handle(&self, kind: &JobKind) -> Result<JobOutput> {
        match kind {
            JobKind::ApplyMigration {
                migration_id,
                options,
            } => self
                .applier
                .apply(*migration_id, *options)
                .await
                .map(JobOutput::Migration),
            JobKind::ReprocessMigration {
                migration_id,
                options,
            } => self.reprocess(*migration_id, *options).await,
            JobKind::RollbackMigration {
                migration_id,
                reason,
            } => self
                .applier
                .rollback(*migration_id, reason)
                .await
                .map(JobOutput::Migration),
            JobKind::SyncInterface {
                interface,
                auto_process,
            } => self.sync(*interface, *auto_process).await,
            JobKind::AutoProcessInterface {
                interface,
                environment,
                require_manifest,
            } => {
                self.auto_process(*interface, *environment, *require_manifest)
                    .await
            }
        }
    }

    async fn reprocess(&self, id: MigrationId, options: ApplyOptions) -> Result<JobOutput> {
        match self.applier.reprocess(id).await {
            // A retry finds the record already moved by the previous attempt.
            Ok(_)
            | Err(Error::InvalidTransition {
                from: MigrationStatus::Pending,
                ..
            }) => {}
            Err(e) => return Err(e),
        }
        self.applier
            .apply(id, options)
            .await
            .map(JobOutput::Migration)
    }

    async fn sync(&self, interface: InterfaceOrigin, auto_process: bool) -> Result<JobOutput> {
        let report = self
            .synchronizer
            .sync_interface(interface, &DiscoveryContext::manual(auto_process))
            .await?;

        let mut dispatched = 0;
        if auto_process {
            for record in self.ledger().pending_for_interface(interface).await? {
                if self
                    .dispatcher
                    .dispatch_apply(record.id, ApplyOptions::default())
                    .await?
                    .is_enqueued()
                {
                    dispatched += 1;
                }
            }
        }

        tracing::info!(
            interface = %interface,
            synced = report.synced(),
            dispatched = dispatched,
            "sync job finished"
        );
        Ok(JobOutput::Synced { report, dispatched })
    }

    async fn auto_process(
        &self,
        interface: InterfaceOrigin,
        environment: Environment,
        require_manifest: bool,
    ) -> Result<JobOutput> {
        let mut dispatched = 0;
        let mut skipped_unapproved = 0;

        for record in self.ledger().pending_for_interface(interface).await? {
            if require_manifest && !self.approved(interface, &record.filename).await {
                tracing::info!(
                    interface = %interface,
                    environment = %environment,
                    filename = %record.filename,
                    "bundle not in manifest; left pending"
                );
                skipped_unapproved += 1;
                continue;
            }
            if self
                .dispatcher
                .dispatch_apply(record.id, ApplyOptions::default())
                .await?
                .is_enqueued()
            {
                dispatched += 1;
            }
        }

        tracing::info!(
            interface = %interface,
            environment = %environment,
            dispatched = dispatched,
            skipped_unapproved = skipped_unapproved,
            "auto-process finished"
        );
        Ok(JobOutput::AutoProcessed {
            interface,
            dispatched,
            skipped_unapproved,
        })
    }

    async fn approved(&self, interface: InterfaceOrigin, filename: &str) -> bool {
        match self.manifest.is_approved(interface, filename).await {
            Ok(approved) => approved,
            Err(e) => {
                tracing::warn!(
                    interface = %interface,
                    filename = %filename,
                    error = %e,
                    "manifest check failed; treating bundle as unapproved"
                );
                false
            }
        }
    }

    /// Terminal handling for a job that ran out of attempts.
    ///
    /// An apply that never got to record its own failure is forced to
    /// `failed`. Both apply and rollback records get the attempt count, the
    /// time, and the last error. A backup the lost attempt already wrote is
    /// recorded so it stays reachable.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the ledger cannot be updated.
    pub async fn on_exhausted(
        &self,
        kind: &JobKind,
        attempts: u32,
        last_error: &str,
    ) -> Result<()> {
        let now = Utc::now();
        let mut patch = MigrationMetadata::new();
        patch.failed_attempts = Some(attempts);
        patch.job_failed_at = Some(now);
        patch.job_error = Some(last_error.to_string());
        patch.push_failure(now, "job", last_error);

        match kind {
            JobKind::ApplyMigration { migration_id, .. }
            | JobKind::ReprocessMigration { migration_id, .. } => {
                self.exhaust_apply(*migration_id, patch, last_error).await
            }
            JobKind::RollbackMigration { migration_id, .. } => {
                patch.rollback_error = Some(last_error.to_string());
                patch.rollback_failed_at = Some(now);
                self.exhaust_rollback(*migration_id, patch).await
            }
            JobKind::SyncInterface { interface, .. }
            | JobKind::AutoProcessInterface { interface, .. } => {
                tracing::error!(
                    job = kind.label(),
                    interface = %interface,
                    attempts = attempts,
                    error = %last_error,
                    "job exhausted"
                );
                Ok(())
            }
        }
    }

    async fn exhaust_apply(
        &self,
        id: MigrationId,
        mut patch: MigrationMetadata,
        last_error: &str,
    ) -> Result<()> {
        let Some(record) = self.ledger().get(id).await? else {
            tracing::warn!(migration_id = %id, "exhausted job for unknown migration");
            return Ok(());
        };

        if record.metadata.backup_path.is_none() {
            let path = self.applier.backup_path_for(&record);
            if self.gateway.object_exists(&path).await.unwrap_or(false) {
                patch.backup_path = Some(path);
            }
        }

        if record.status == MigrationStatus::Pending {
            let mut failed = patch.clone();
            failed.error = Some(last_error.to_string());
            failed.failed_at = failed.job_failed_at;
            let transition =
                Transition::new(MigrationStatus::Pending, MigrationStatus::Failed, failed);
            match self.ledger().commit_transition(id, transition).await? {
                CommitResult::Committed(record) => {
                    tracing::error!(
                        migration_id = %id,
                        filename = %record.filename,
                        error = %last_error,
                        "apply job exhausted; migration marked failed"
                    );
                    return Ok(());
                }
                CommitResult::NotFound => return Ok(()),
                CommitResult::StateMismatch { actual } => {
                    tracing::debug!(
                        migration_id = %id,
                        status = %actual,
                        "status moved under exhaustion handler"
                    );
                }
            }
        }

        self.merge_or_warn(id, patch).await
    }

    async fn exhaust_rollback(&self, id: MigrationId, patch: MigrationMetadata) -> Result<()> {
        let Some(record) = self.ledger().merge_metadata(id, patch).await? else {
            tracing::warn!(migration_id = %id, "exhausted job for unknown migration");
            return Ok(());
        };
        if let (MigrationStatus::Completed, Some(restored_at)) =
            (record.status, record.metadata.rollback_restored_at)
        {
            tracing::error!(
                migration_id = %id,
                filename = %record.filename,
                restored_at = %restored_at,
                "rollback exhausted after its backup was restored; record still completed"
            );
        }
        Ok(())
    }

    async fn merge_or_warn(&self, id: MigrationId, patch: MigrationMetadata) -> Result<()> {
        if self.ledger().merge_metadata(id, patch).await?.is_none() {
            tracing::warn!(migration_id = %id, "exhausted job for unknown migration");
        }
        Ok(())
    }
}

/// Pulls jobs off a queue and runs them.
#[derive(Clone)]
pub struct MigrationWorker {
    queue: Arc<dyn JobQueue>,
    handler: JobHandler,
    events: Arc<dyn EventSink>,
    policy: RetryPolicy,
    poll_interval: Duration,
    metrics: MigrateMetrics,
}

impl fmt::Debug for MigrationWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationWorker")
            .field("queue", &self.queue.queue_name())
            .field("policy", &self.policy)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl MigrationWorker {
    /// Creates a worker with the default retry policy.
    #[must_use]
    pub fn new(queue: Arc<dyn JobQueue>, handler: JobHandler, events: Arc<dyn EventSink>) -> Self {
        Self {
            queue,
            handler,
            events,
            policy: RetryPolicy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            metrics: MigrateMetrics::new(),
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the idle poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Runs the next visible job, if any. Returns true if one ran.
    ///
    /// # Errors
    ///
    /// Returns an error only if the queue itself fails. Job failures are
    /// settled on the queue and never surface here.
    pub async fn run_once(&self) -> Result<bool> {
        let Some(reservation) = self.queue.reserve().await? else {
            return Ok(false);
        };
        let span = tracing::info_span!(
            "job",
            job = reservation.envelope.kind.label(),
            key = %reservation.envelope.unique_key(),
            attempt = reservation.envelope.attempt,
        );
        self.process(&reservation).instrument(span).await?;
        Ok(true)
    }

    /// Runs visible jobs until none is left. Returns how many ran.
    ///
    /// # Errors
    ///
    /// See [`MigrationWorker::run_once`].
    pub async fn run_until_idle(&self) -> Result<usize> {
        let mut ran = 0;
        while self.run_once().await? {
            ran += 1;
        }
        Ok(ran)
    }

    /// Runs jobs until the queue is empty, waiting out retry delays.
    ///
    /// # Errors
    ///
    /// See [`MigrationWorker::run_once`].
    pub async fn run_until_empty(&self) -> Result<usize> {
        let mut ran = 0;
        loop {
            ran += self.run_until_idle().await?;
            if self.queue.queue_depth().await? == 0 {
                return Ok(ran);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Runs until `shutdown` turns true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(queue = self.queue.queue_name(), "migration worker started");
        while !*shutdown.borrow() {
            match self.run_once().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => tracing::error!(error = %e, "worker poll failed"),
            }
            tokio::select! {
                () = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }
        tracing::info!(queue = self.queue.queue_name(), "migration worker stopped");
    }

    async fn process(&self, reservation: &Reservation) -> Result<()> {
        let envelope = &reservation.envelope;
        let kind = &envelope.kind;
        let attempt = envelope.attempt;

        match self.handler.handle(kind).await {
            Ok(output) => {
                if let JobOutput::Migration(outcome) = &output {
                    self.events.publish(outcome.to_event());
                }
                self.queue.complete(reservation).await
            }
            Err(e) if e.is_retryable() && self.policy.should_retry(attempt) => {
                let delay = self.policy.delay_after(attempt);
                tracing::warn!(
                    error = %e,
                    delay_secs = delay.as_secs(),
                    "job attempt failed, retrying"
                );
                self.metrics.record_retry(kind.label());
                self.queue.retry(reservation, delay).await
            }
            Err(e) if e.is_retryable() => {
                let last_error = e.to_string();
                tracing::error!(error = %last_error, attempts = attempt, "job exhausted");
                self.metrics.record_exhausted(kind.label());
                let exhausted = self.handler.on_exhausted(kind, attempt, &last_error).await;
                if let Err(handler_err) = exhausted {
                    tracing::error!(error = %handler_err, "exhaustion handler failed");
                }
                self.queue.fail(reservation).await
            }
            Err(e) => {
                tracing::warn!(error = %e, error_kind = e.label(), "job rejected; not retrying");
                self.queue.fail(reservation).await
            }
        }
    }
}
