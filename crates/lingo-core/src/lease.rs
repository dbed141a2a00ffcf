//! Expiring check-and-set markers in object storage.
//!
//! A [`Lease`] is a single object holding a [`LeaseInfo`] with an expiry.
//! Acquisition is atomic:
//!
//! 1. Write the lease with a `DoesNotExist` precondition. Only one writer wins.
//! 2. If the object exists, read its version *first*, then its contents.
//! 3. If the lease has expired, take it over with a `MatchesVersion` write
//!    bound to the version from step 2. A concurrent taker makes that write fail.
//!
//! Leases are not released on success: they are throttles, and expiry is the
//! only way they end. [`Lease::release`] exists for operators.
//!
//! # Example
//!
//! ```rust,ignore
//! let lease = Lease::new(storage.clone(), "locks/reconcile.lease");
//! match lease.try_acquire(Duration::from_secs(300), Some("reconcile".into())).await? {
//!     LeaseOutcome::Acquired(info) => { /* run */ }
//!     LeaseOutcome::Held(info) => { /* throttled until info.expires_at */ }
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::storage::{StorageBackend, WritePrecondition, WriteResult};

/// Attempts before a lease that keeps changing underneath us is reported as held.
const MAX_RACE_RETRIES: u32 = 3;

/// Lease file contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseInfo {
    /// Unique lease holder ID.
    pub holder_id: String,

    /// When the lease was acquired.
    pub acquired_at: DateTime<Utc>,

    /// When the lease expires.
    pub expires_at: DateTime<Utc>,

    /// Optional description of what the lease guards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

impl LeaseInfo {
    /// Creates lease info starting at `now` and lasting `ttl`.
    #[must_use]
    pub fn new(holder_id: impl Into<String>, now: DateTime<Utc>, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            holder_id: holder_id.into(),
            acquired_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            purpose: None,
        }
    }

    /// Returns whether this lease has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Returns the time left at `now`, or zero if expired.
    #[must_use]
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Outcome of a single acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// This caller now holds the lease.
    Acquired(LeaseInfo),
    /// Someone else holds an unexpired lease.
    Held(LeaseInfo),
}

impl LeaseOutcome {
    /// Returns true if the lease was acquired.
    #[must_use]
    pub const fn is_acquired(&self) -> bool {
        matches!(self, Self::Acquired(_))
    }
}

/// An expiring marker backed by object storage.
pub struct Lease<S: StorageBackend + ?Sized> {
    storage: Arc<S>,
    path: String,
    holder_id: String,
}

impl<S: StorageBackend + ?Sized> Clone for Lease<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            path: self.path.clone(),
            holder_id: self.holder_id.clone(),
        }
    }
}

impl<S: StorageBackend + ?Sized> std::fmt::Debug for Lease<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("path", &self.path)
            .field("holder_id", &self.holder_id)
            .finish_non_exhaustive()
    }
}

impl<S: StorageBackend + ?Sized> Lease<S> {
    /// Creates a lease handle with a fresh holder ID.
    #[must_use]
    pub fn new(storage: Arc<S>, path: impl Into<String>) -> Self {
        Self {
            storage,
            path: path.into(),
            holder_id: Ulid::new().to_string(),
        }
    }

    /// Returns the holder ID for this handle.
    #[must_use]
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Returns the object path of the lease.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Attempts to acquire the lease once, using the wall clock.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails or the lease object is corrupt.
    pub async fn try_acquire(
        &self,
        ttl: Duration,
        purpose: Option<String>,
    ) -> Result<LeaseOutcome> {
        self.try_acquire_at(Utc::now(), ttl, purpose).await
    }

    /// Attempts to acquire the lease once, as of `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails or the lease object is corrupt.
    pub async fn try_acquire_at(
        &self,
        now: DateTime<Utc>,
        ttl: Duration,
        purpose: Option<String>,
    ) -> Result<LeaseOutcome> {
        let mut info = LeaseInfo::new(&self.holder_id, now, ttl);
        info.purpose = purpose;
        let payload = Bytes::from(serde_json::to_vec(&info).map_err(|e| Error::Internal {
            message: format!("serialize lease: {e}"),
        })?);

        for _ in 0..MAX_RACE_RETRIES {
            match self
                .storage
                .put(&self.path, payload.clone(), WritePrecondition::DoesNotExist)
                .await?
            {
                WriteResult::Success { .. } => return Ok(LeaseOutcome::Acquired(info)),
                WriteResult::PreconditionFailed { .. } => {}
            }

            // Version first, then contents, so the expiry decision is bound to
            // the same version used for the takeover write.
            let Some(meta) = self.storage.head(&self.path).await? else {
                continue;
            };
            let Some(existing) = self.current().await? else {
                continue;
            };

            if !existing.is_expired_at(now) {
                return Ok(LeaseOutcome::Held(existing));
            }

            match self
                .storage
                .put(
                    &self.path,
                    payload.clone(),
                    WritePrecondition::MatchesVersion(meta.version),
                )
                .await?
            {
                WriteResult::Success { .. } => return Ok(LeaseOutcome::Acquired(info)),
                WriteResult::PreconditionFailed { .. } => {}
            }
        }

        // Lost every race; whoever won holds it now.
        match self.current().await? {
            Some(existing) => Ok(LeaseOutcome::Held(existing)),
            None => Err(Error::PreconditionFailed {
                message: format!("lease {} kept changing during acquisition", self.path),
            }),
        }
    }

    /// Reads the current lease, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails or the lease object is corrupt.
    pub async fn current(&self) -> Result<Option<LeaseInfo>> {
        match self.storage.get(&self.path).await {
            Ok(data) => {
                let info: LeaseInfo =
                    serde_json::from_slice(&data).map_err(|e| Error::Internal {
                        message: format!("parse lease: {e}"),
                    })?;
                Ok(Some(info))
            }
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Removes the lease if this handle holds it. Returns true if it did.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails or the lease object is corrupt.
    pub async fn release_if_held(&self) -> Result<bool> {
        match self.current().await? {
            Some(info) if info.holder_id == self.holder_id => {
                self.storage.delete(&self.path).await?;
                tracing::debug!(path = %self.path, "released lease");
                Ok(true)
            }
            Some(_) | None => Ok(false),
        }
    }

    /// Removes the lease regardless of holder (operator action).
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn release(&self) -> Result<()> {
        tracing::warn!(path = %self.path, "releasing lease");
        self.storage.delete(&self.path).await
    }
}
