//! Approved-bundle allow-lists.
//!
//! On staging and production, reconciliation only dispatches applies for
//! bundles listed in the interface's manifest. Unlisted bundles stay pending.

use std::fmt;

use async_trait::async_trait;
use serde::Deserialize;

use lingo_core::InterfaceOrigin;

use crate::error::{Error, Result};
use crate::gateway::BundleGateway;

/// Answers whether a bundle is approved for automatic apply.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Returns true if `filename` is approved for `interface`.
    async fn is_approved(&self, interface: InterfaceOrigin, filename: &str) -> Result<bool>;
}

/// Manifest document stored next to the bundles.
///
/// ```json
/// { "files": ["2025-03-01_120000.json", { "filename": "2025-03-02_090000.json" }] }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestDocument {
    /// Approved bundles.
    #[serde(default)]
    pub files: Vec<ManifestEntry>,
}

/// One approved bundle.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ManifestEntry {
    /// Bare filename.
    Name(String),
    /// Object form.
    Detailed {
        /// Bundle filename.
        filename: String,
    },
}

impl ManifestEntry {
    /// Returns the approved filename.
    #[must_use]
    pub fn filename(&self) -> &str {
        match self {
            Self::Name(filename) | Self::Detailed { filename } => filename,
        }
    }
}

impl ManifestDocument {
    /// Parses a manifest.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the document is malformed.
    pub fn parse(content: &[u8]) -> Result<Self> {
        serde_json::from_slice(content)
            .map_err(|e| Error::serialization(format!("invalid manifest: {e}")))
    }

    /// Returns true if `filename` is listed.
    #[must_use]
    pub fn contains(&self, filename: &str) -> bool {
        self.files.iter().any(|entry| entry.filename() == filename)
    }
}

/// Manifest read from `migrations/{interface}/manifest.json`.
///
/// A missing manifest approves nothing.
#[derive(Clone)]
pub struct StoreManifest {
    gateway: BundleGateway,
}

impl fmt::Debug for StoreManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreManifest").finish_non_exhaustive()
    }
}

impl StoreManifest {
    /// Creates a manifest source over `gateway`.
    #[must_use]
    pub fn new(gateway: BundleGateway) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ManifestSource for StoreManifest {
    async fn is_approved(&self, interface: InterfaceOrigin, filename: &str) -> Result<bool> {
        match self.gateway.read_manifest(interface).await? {
            Some(bytes) => Ok(ManifestDocument::parse(&bytes)?.contains(filename)),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use lingo_core::{MemoryBackend, StorageBackend, WritePrecondition};
    use std::sync::Arc;

    #[tokio::test]
    async fn reads_both_entry_forms() {
        let storage = Arc::new(MemoryBackend::new());
        storage
            .put(
                "migrations/mobile/manifest.json",
                Bytes::from(r#"{"files":["a.json",{"filename":"b.json"}]}"#),
                WritePrecondition::None,
            )
            .await
            .unwrap();
        let manifest = StoreManifest::new(BundleGateway::new(storage));

        assert!(manifest.is_approved(InterfaceOrigin::Mobile, "a.json").await.unwrap());
        assert!(manifest.is_approved(InterfaceOrigin::Mobile, "b.json").await.unwrap());
        assert!(!manifest.is_approved(InterfaceOrigin::Mobile, "c.json").await.unwrap());
        assert!(!manifest.is_approved(InterfaceOrigin::WebFinancer, "a.json").await.unwrap());
    }

    #[test]
    fn malformed_manifest_is_an_error() {
        assert!(ManifestDocument::parse(b"{\"files\": 3}").is_err());
    }
}
