//! In-memory job queue.
//!
//! ## Limitations
//!
//! - **Single-process only**: jobs are lost on restart. Recovery relies on
//!   the next reconciliation re-dispatching pending records.
//! - **Delays use the tokio clock**, so paused-time tests can fast-forward
//!   through retry backoff.

use std::collections::{HashMap, VecDeque};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use ulid::Ulid;

use super::{EnqueueOptions, EnqueueResult, JobQueue, Reservation};
use crate::error::{Error, Result};
use crate::job::JobEnvelope;

#[derive(Debug, Clone)]
struct QueueEntry {
    message_id: String,
    envelope: JobEnvelope,
    visible_at: Option<Instant>,
}

impl QueueEntry {
    fn is_visible(&self, now: Instant) -> bool {
        self.visible_at.is_none_or(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    waiting: VecDeque<QueueEntry>,
    in_flight: HashMap<String, JobEnvelope>,
    held_keys: HashMap<String, String>,
}

/// In-memory job queue.
#[derive(Debug)]
pub struct InMemoryJobQueue {
    name: String,
    state: RwLock<QueueState>,
    max_capacity: Option<usize>,
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new("translation-migrations")
    }
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("job queue lock poisoned")
}

impl InMemoryJobQueue {
    /// Creates an unbounded queue.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(QueueState::default()),
            max_capacity: None,
        }
    }

    /// Creates a queue that holds at most `max_capacity` waiting jobs.
    #[must_use]
    pub fn with_capacity(name: impl Into<String>, max_capacity: usize) -> Self {
        Self {
            max_capacity: Some(max_capacity),
            ..Self::new(name)
        }
    }

    /// Returns the envelopes of all waiting jobs, in queue order.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn waiting(&self) -> Result<Vec<JobEnvelope>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.waiting.iter().map(|e| e.envelope.clone()).collect())
    }

    /// Returns true if a job with `key` is live.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn is_held(&self, key: &str) -> Result<bool> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.held_keys.contains_key(key))
    }

    fn settle(&self, reservation: &Reservation, release_key: bool) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        let envelope = state
            .in_flight
            .remove(&reservation.message_id)
            .unwrap_or_else(|| reservation.envelope.clone());
        if release_key {
            state.held_keys.remove(&envelope.unique_key());
        }
        drop(state);
        Ok(())
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(
        &self,
        envelope: JobEnvelope,
        options: EnqueueOptions,
    ) -> Result<EnqueueResult> {
        let key = envelope.unique_key();
        let mut state = self.state.write().map_err(poison_err)?;

        if let Some(existing) = state.held_keys.get(&key) {
            return Ok(EnqueueResult::Deduplicated {
                existing_message_id: existing.clone(),
            });
        }

        if let Some(max) = self.max_capacity {
            if state.waiting.len() >= max {
                return Ok(EnqueueResult::QueueFull);
            }
        }

        let message_id = Ulid::new().to_string();
        state.held_keys.insert(key, message_id.clone());
        state.waiting.push_back(QueueEntry {
            message_id: message_id.clone(),
            envelope,
            visible_at: options.delay.map(|delay| Instant::now() + delay),
        });
        drop(state);

        Ok(EnqueueResult::Enqueued { message_id })
    }

    async fn reserve(&self) -> Result<Option<Reservation>> {
        let now = Instant::now();
        let mut state = self.state.write().map_err(poison_err)?;
        let Some(index) = state.waiting.iter().position(|e| e.is_visible(now)) else {
            return Ok(None);
        };
        let Some(entry) = state.waiting.remove(index) else {
            return Ok(None);
        };
        state
            .in_flight
            .insert(entry.message_id.clone(), entry.envelope.clone());
        drop(state);

        Ok(Some(Reservation {
            message_id: entry.message_id,
            envelope: entry.envelope,
        }))
    }

    async fn complete(&self, reservation: &Reservation) -> Result<()> {
        self.settle(reservation, true)
    }

    async fn retry(&self, reservation: &Reservation, delay: Duration) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        let envelope = state
            .in_flight
            .remove(&reservation.message_id)
            .unwrap_or_else(|| reservation.envelope.clone());
        state.waiting.push_back(QueueEntry {
            message_id: reservation.message_id.clone(),
            envelope: envelope.next_attempt(),
            visible_at: Some(Instant::now() + delay),
        });
        drop(state);
        Ok(())
    }

    async fn fail(&self, reservation: &Reservation) -> Result<()> {
        self.settle(reservation, true)
    }

    async fn queue_depth(&self) -> Result<usize> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.waiting.len())
    }

    fn queue_name(&self) -> &str {
        &self.name
    }
}
