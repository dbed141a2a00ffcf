//! The content-apply seam.
//!
//! How translation strings are merged into live content is a collaborator's
//! business. The engine only needs two operations, both idempotent:
//! apply a bundle, and restore a backup.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use lingo_core::InterfaceOrigin;

use crate::checksum::TranslationBundle;
use crate::error::{Error, Result};
use crate::gateway::BundleGateway;

/// Key counts produced by an apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApplySummary {
    /// Keys in the bundle.
    pub keys_total: usize,
    /// Keys that did not exist before.
    pub keys_added: usize,
    /// Keys whose value changed.
    pub keys_updated: usize,
    /// Keys already at the bundle's value.
    pub keys_unchanged: usize,
}

impl ApplySummary {
    /// Returns true if the apply changed nothing.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.keys_added == 0 && self.keys_updated == 0
    }

    /// Counts what merging `bundle` into `baseline` changes.
    ///
    /// Returns `None` if `baseline` is not a JSON object.
    #[must_use]
    pub fn against(baseline: &[u8], bundle: &TranslationBundle) -> Option<Self> {
        match serde_json::from_slice(baseline) {
            Ok(Value::Object(mut live)) => Some(merge(&mut live, bundle)),
            Ok(_) | Err(_) => None,
        }
    }
}

fn merge(live: &mut Map<String, Value>, bundle: &TranslationBundle) -> ApplySummary {
    let mut summary = ApplySummary {
        keys_total: bundle.len(),
        ..ApplySummary::default()
    };
    for (key, value) in bundle.entries() {
        match live.get(key) {
            None => summary.keys_added += 1,
            Some(existing) if existing == value => summary.keys_unchanged += 1,
            Some(_) => summary.keys_updated += 1,
        }
        live.insert(key.clone(), value.clone());
    }
    summary
}

/// Applies bundles to, and restores backups into, live translation content.
///
/// Implementations must be idempotent: a retried job re-runs `apply` from
/// scratch against whatever the previous attempt left behind.
#[async_trait]
pub trait ContentApplier: Send + Sync {
    /// Applies `bundle` to the live content of `interface`.
    ///
    /// Returns [`Error::ContentApply`] if the bundle is rejected, or a
    /// transient error if the live content could not be read or written.
    async fn apply(
        &self,
        interface: InterfaceOrigin,
        bundle: &TranslationBundle,
    ) -> Result<ApplySummary>;

    /// Replaces the live content of `interface` with `backup`.
    async fn restore(&self, interface: InterfaceOrigin, backup: Bytes) -> Result<()>;
}

/// Content applier that merges bundles into `current.json` in the object store.
///
/// Top-level keys of the bundle overwrite the same keys in the live content;
/// other keys are kept.
#[derive(Clone)]
pub struct StoreContentApplier {
    gateway: BundleGateway,
}

impl fmt::Debug for StoreContentApplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreContentApplier").finish_non_exhaustive()
    }
}

impl StoreContentApplier {
    /// Creates an applier over `gateway`.
    #[must_use]
    pub fn new(gateway: BundleGateway) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ContentApplier for StoreContentApplier {
    async fn apply(
        &self,
        interface: InterfaceOrigin,
        bundle: &TranslationBundle,
    ) -> Result<ApplySummary> {
        let current = self.gateway.read_current_or_baseline(interface).await?;
        let mut live: Map<String, Value> = match serde_json::from_slice(&current) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                return Err(Error::ContentApply {
                    message: format!("live content for {interface} is not a JSON object"),
                });
            }
        };

        let summary = merge(&mut live, bundle);
        if !summary.is_noop() {
            let bytes = serde_json::to_vec_pretty(&live)?;
            self.gateway.write_current(interface, Bytes::from(bytes)).await?;
        }

        tracing::debug!(
            interface = %interface,
            added = summary.keys_added,
            updated = summary.keys_updated,
            unchanged = summary.keys_unchanged,
            "applied translation bundle"
        );
        Ok(summary)
    }

    async fn restore(&self, interface: InterfaceOrigin, backup: Bytes) -> Result<()> {
        if !matches!(serde_json::from_slice::<Value>(&backup), Ok(Value::Object(_))) {
            return Err(Error::ContentApply {
                message: format!("backup for {interface} is not a JSON object"),
            });
        }
        self.gateway.write_current(interface, backup).await
    }
}
