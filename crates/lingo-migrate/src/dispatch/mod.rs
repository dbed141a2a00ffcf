//! Job queue abstraction.
//!
//! - [`JobQueue`]: enqueue, reserve and settle jobs
//! - [`memory::InMemoryJobQueue`]: in-process queue used by the server and tests
//!
//! ## Uniqueness
//!
//! A job's [`JobKind::unique_key`](crate::job::JobKind::unique_key) is held
//! from enqueue until the job is completed or failed, including while it runs
//! and while a retry is waiting. Enqueueing a job whose key is held returns
//! [`EnqueueResult::Deduplicated`].

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::job::JobEnvelope;

pub use memory::InMemoryJobQueue;

/// Result of enqueueing a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueResult {
    /// The job was enqueued.
    Enqueued {
        /// Queue-specific message ID.
        message_id: String,
    },
    /// A job with the same key is already live.
    Deduplicated {
        /// The live job's message ID.
        existing_message_id: String,
    },
    /// Queue is at capacity.
    QueueFull,
}

impl EnqueueResult {
    /// Returns true if the job was enqueued.
    #[must_use]
    pub const fn is_enqueued(&self) -> bool {
        matches!(self, Self::Enqueued { .. })
    }

    /// Returns the message ID of the new or existing job.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::Enqueued { message_id }
            | Self::Deduplicated {
                existing_message_id: message_id,
            } => Some(message_id),
            Self::QueueFull => None,
        }
    }

    /// Returns a short label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
            Self::Deduplicated { .. } => "deduplicated",
            Self::QueueFull => "queue_full",
        }
    }
}

/// Options for enqueueing.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Delay before the job becomes visible to workers.
    pub delay: Option<Duration>,
}

impl EnqueueOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the delay before the job becomes visible.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A job handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    /// Queue-specific message ID.
    pub message_id: String,
    /// The job.
    pub envelope: JobEnvelope,
}

/// Queue of background jobs.
///
/// ## Thread Safety
///
/// All methods take `&self`; many workers may reserve concurrently. A
/// reserved job is invisible to other workers until it is settled with
/// [`JobQueue::complete`], [`JobQueue::retry`] or [`JobQueue::fail`].
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues a job.
    ///
    /// # Returns
    ///
    /// - `EnqueueResult::Enqueued` with message ID on success
    /// - `EnqueueResult::Deduplicated` if a job with the same key is live
    /// - `EnqueueResult::QueueFull` if the queue is at capacity
    async fn enqueue(&self, envelope: JobEnvelope, options: EnqueueOptions)
    -> Result<EnqueueResult>;

    /// Enqueues multiple jobs.
    ///
    /// Default implementation calls `enqueue` for each job.
    async fn enqueue_batch(
        &self,
        jobs: Vec<(JobEnvelope, EnqueueOptions)>,
    ) -> Result<Vec<EnqueueResult>> {
        let mut results = Vec::with_capacity(jobs.len());
        for (envelope, options) in jobs {
            results.push(self.enqueue(envelope, options).await?);
        }
        Ok(results)
    }

    /// Takes the next visible job, if any.
    async fn reserve(&self) -> Result<Option<Reservation>>;

    /// Marks a reserved job done and releases its key.
    async fn complete(&self, reservation: &Reservation) -> Result<()>;

    /// Re-queues a reserved job as its next attempt after `delay`.
    ///
    /// The key stays held.
    async fn retry(&self, reservation: &Reservation, delay: Duration) -> Result<()>;

    /// Drops a reserved job for good and releases its key.
    async fn fail(&self, reservation: &Reservation) -> Result<()>;

    /// Returns the number of jobs waiting, visible or delayed.
    async fn queue_depth(&self) -> Result<usize>;

    /// Returns the queue's name.
    fn queue_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_result_accessors() {
        let enqueued = EnqueueResult::Enqueued {
            message_id: "msg-1".into(),
        };
        assert!(enqueued.is_enqueued());
        assert_eq!(enqueued.message_id(), Some("msg-1"));
        assert_eq!(enqueued.label(), "enqueued");

        let dedup = EnqueueResult::Deduplicated {
            existing_message_id: "msg-2".into(),
        };
        assert!(!dedup.is_enqueued());
        assert_eq!(dedup.message_id(), Some("msg-2"));

        assert_eq!(EnqueueResult::QueueFull.message_id(), None);
    }

    #[test]
    fn enqueue_options_builder() {
        let options = EnqueueOptions::new().with_delay(Duration::from_secs(60));
        assert_eq!(options.delay, Some(Duration::from_secs(60)));
    }
}
