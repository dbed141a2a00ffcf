//! Turns requests into queued jobs.
//!
//! Dispatch is fire-and-forget: the caller learns only that the work is
//! queued (or already live), never its outcome.

use std::fmt;
use std::sync::Arc;

use lingo_core::{Environment, InterfaceOrigin, MigrationId};

use crate::applier::ApplyOptions;
use crate::dispatch::{EnqueueOptions, EnqueueResult, JobQueue};
use crate::error::{Error, Result};
use crate::job::{JobEnvelope, JobKind};
use crate::metrics::MigrateMetrics;

/// Enqueues migration jobs with uniqueness keys.
#[derive(Clone)]
pub struct JobDispatcher {
    queue: Arc<dyn JobQueue>,
    metrics: MigrateMetrics,
}

impl fmt::Debug for JobDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDispatcher")
            .field("queue", &self.queue.queue_name())
            .finish_non_exhaustive()
    }
}

impl JobDispatcher {
    /// Creates a dispatcher over `queue`.
    #[must_use]
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self {
            queue,
            metrics: MigrateMetrics::new(),
        }
    }

    /// Returns the underlying queue.
    #[must_use]
    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    /// Enqueues `kind`.
    ///
    /// A job whose key is already live is not enqueued again; that is
    /// reported as `Deduplicated`, not as an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueFull`] if the queue refuses the job, or the
    /// queue's own error.
    pub async fn dispatch(&self, kind: JobKind) -> Result<EnqueueResult> {
        let label = kind.label();
        let key = kind.unique_key();
        let result = self
            .queue
            .enqueue(JobEnvelope::new(kind), EnqueueOptions::new())
            .await?;
        self.metrics.record_dispatch(label, result.label());

        match &result {
            EnqueueResult::Enqueued { message_id } => {
                tracing::info!(
                    job = label,
                    key = %key,
                    message_id = %message_id,
                    "job dispatched"
                );
            }
            EnqueueResult::Deduplicated {
                existing_message_id,
            } => {
                tracing::debug!(
                    job = label,
                    key = %key,
                    existing_message_id = %existing_message_id,
                    "job already live; dispatch deduplicated"
                );
            }
            EnqueueResult::QueueFull => {
                tracing::warn!(job = label, key = %key, "queue full; dispatch refused");
                return Err(Error::QueueFull {
                    queue: self.queue.queue_name().to_string(),
                });
            }
        }

        if let Ok(depth) = self.queue.queue_depth().await {
            self.metrics.set_queue_depth(self.queue.queue_name(), depth);
        }
        Ok(result)
    }

    /// Enqueues an apply of `migration_id`.
    ///
    /// # Errors
    ///
    /// See [`JobDispatcher::dispatch`].
    pub async fn dispatch_apply(
        &self,
        migration_id: MigrationId,
        options: ApplyOptions,
    ) -> Result<EnqueueResult> {
        self.dispatch(JobKind::ApplyMigration {
            migration_id,
            options,
        })
        .await
    }

    /// Enqueues a reprocess of failed `migration_id`: the job moves it back
    /// to pending and applies it. The record is untouched until the job runs.
    ///
    /// # Errors
    ///
    /// See [`JobDispatcher::dispatch`].
    pub async fn dispatch_reprocess(
        &self,
        migration_id: MigrationId,
        options: ApplyOptions,
    ) -> Result<EnqueueResult> {
        self.dispatch(JobKind::ReprocessMigration {
            migration_id,
            options,
        })
        .await
    }

    /// Enqueues a rollback of `migration_id`.
    ///
    /// # Errors
    ///
    /// See [`JobDispatcher::dispatch`].
    pub async fn dispatch_rollback(
        &self,
        migration_id: MigrationId,
        reason: impl Into<String>,
    ) -> Result<EnqueueResult> {
        self.dispatch(JobKind::RollbackMigration {
            migration_id,
            reason: reason.into(),
        })
        .await
    }

    /// Enqueues discovery for `interface`.
    ///
    /// # Errors
    ///
    /// See [`JobDispatcher::dispatch`].
    pub async fn dispatch_sync(
        &self,
        interface: InterfaceOrigin,
        auto_process: bool,
    ) -> Result<EnqueueResult> {
        self.dispatch(JobKind::SyncInterface {
            interface,
            auto_process,
        })
        .await
    }

    /// Enqueues policy-driven processing of pending records for `interface`.
    ///
    /// # Errors
    ///
    /// See [`JobDispatcher::dispatch`].
    pub async fn dispatch_auto_process(
        &self,
        interface: InterfaceOrigin,
        environment: Environment,
    ) -> Result<EnqueueResult> {
        self.dispatch(JobKind::AutoProcessInterface {
            interface,
            environment,
            require_manifest: environment.requires_manifest(),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::InMemoryJobQueue;

    #[tokio::test]
    async fn duplicate_dispatch_is_not_an_error() {
        let dispatcher = JobDispatcher::new(Arc::new(InMemoryJobQueue::default()));
        let first = dispatcher
            .dispatch_apply(MigrationId::new(1), ApplyOptions::default())
            .await
            .unwrap();
        let second = dispatcher
            .dispatch_apply(MigrationId::new(1), ApplyOptions::default())
            .await
            .unwrap();
        assert!(first.is_enqueued());
        assert!(matches!(second, EnqueueResult::Deduplicated { .. }));
        assert_eq!(dispatcher.queue().queue_depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn full_queue_is_an_error() {
        let dispatcher = JobDispatcher::new(Arc::new(InMemoryJobQueue::with_capacity("q", 1)));
        dispatcher
            .dispatch_sync(InterfaceOrigin::Mobile, false)
            .await
            .unwrap();
        let err = dispatcher
            .dispatch_sync(InterfaceOrigin::WebFinancer, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QueueFull { ref queue } if queue == "q"));
    }

    #[tokio::test]
    async fn auto_process_carries_manifest_policy() {
        let queue = Arc::new(InMemoryJobQueue::default());
        let dispatcher = JobDispatcher::new(queue.clone());
        dispatcher
            .dispatch_auto_process(InterfaceOrigin::Mobile, Environment::Production)
            .await
            .unwrap();
        let waiting = queue.waiting().unwrap();
        assert!(matches!(
            waiting[0].kind,
            JobKind::AutoProcessInterface {
                require_manifest: true,
                ..
            }
        ));
    }
}
