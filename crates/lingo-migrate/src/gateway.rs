//! Bundle store gateway.
//!
//! Thin layer over the object store that speaks in interfaces and bundle
//! names, and translates storage failures into the engine's taxonomy:
//! missing objects become [`Error::ObjectNotFound`], failed writes become
//! [`Error::StoreWrite`].

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use lingo_core::{BundlePaths, InterfaceOrigin, StorageBackend, WritePrecondition, WriteResult};

use crate::error::{Error, Result};

/// Marker embedded in the name of every pre-apply backup.
pub const BACKUP_MARKER: &str = "before-apply-migration";

/// Content substituted when an interface has no live content yet.
pub const EMPTY_BASELINE: &[u8] = b"{}";

/// A backup as it stands after [`BundleGateway::write_backup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    /// Object path.
    pub path: String,
    /// Stored content. For a reused backup this is what the earlier
    /// attempt wrote, not what was offered.
    pub content: Bytes,
    /// True if the object already existed and was left alone.
    pub reused: bool,
}

/// One object under an interface's backup directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupEntry {
    /// Object path.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Last write time, if the store reports one.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Gateway to bundles, live content and backups.
#[derive(Clone)]
pub struct BundleGateway {
    storage: Arc<dyn StorageBackend>,
}

impl fmt::Debug for BundleGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleGateway").finish_non_exhaustive()
    }
}

impl BundleGateway {
    /// Creates a gateway over `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Returns the underlying storage backend.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    /// Lists bundle filenames for `interface`, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns a storage error if listing fails.
    pub async fn list_bundles(&self, interface: InterfaceOrigin) -> Result<Vec<String>> {
        let paths = BundlePaths::new(interface);
        let mut names: Vec<String> = self
            .storage
            .list(&paths.prefix())
            .await?
            .iter()
            .filter_map(|meta| paths.bundle_filename(&meta.path))
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }

    /// Reads bundle `name` for `interface`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObjectNotFound`] if the bundle is absent.
    pub async fn read(&self, interface: InterfaceOrigin, name: &str) -> Result<Bytes> {
        let path = BundlePaths::new(interface).bundle(name)?;
        self.read_object(&path).await
    }

    /// Returns true if bundle `name` exists for `interface`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the check fails.
    pub async fn exists(&self, interface: InterfaceOrigin, name: &str) -> Result<bool> {
        let path = BundlePaths::new(interface).bundle(name)?;
        Ok(self.storage.exists(&path).await?)
    }

    /// Reads any object by path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObjectNotFound`] if the object is absent.
    pub async fn read_object(&self, path: &str) -> Result<Bytes> {
        match self.storage.get(path).await {
            Ok(bytes) => Ok(bytes),
            Err(lingo_core::Error::NotFound(_)) => Err(Error::ObjectNotFound {
                path: path.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns true if an object exists at `path`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the check fails.
    pub async fn object_exists(&self, path: &str) -> Result<bool> {
        Ok(self.storage.exists(path).await?)
    }

    /// Reads the live content of `interface`, or the empty baseline if there
    /// is none yet.
    ///
    /// # Errors
    ///
    /// Returns a storage error for anything other than a missing object.
    pub async fn read_current_or_baseline(&self, interface: InterfaceOrigin) -> Result<Bytes> {
        let path = BundlePaths::new(interface).current();
        match self.read_object(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(Error::ObjectNotFound { .. }) => {
                tracing::debug!(
                    interface = %interface,
                    "no live content yet, using empty baseline"
                );
                Ok(Bytes::from_static(EMPTY_BASELINE))
            }
            Err(e) => Err(e),
        }
    }

    /// Replaces the live content of `interface`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreWrite`] if the write fails.
    pub async fn write_current(&self, interface: InterfaceOrigin, content: Bytes) -> Result<()> {
        let path = BundlePaths::new(interface).current();
        self.write(&path, content).await
    }

    /// Reads the manifest of `interface`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns a storage error for anything other than a missing object.
    pub async fn read_manifest(&self, interface: InterfaceOrigin) -> Result<Option<Bytes>> {
        let path = BundlePaths::new(interface).manifest();
        match self.read_object(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(Error::ObjectNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Returns the deterministic backup path for `(interface, marker, tag)`.
    #[must_use]
    pub fn backup_path(
        &self,
        interface: InterfaceOrigin,
        marker: &str,
        tag: &str,
        extension: &str,
    ) -> String {
        BundlePaths::new(interface).backup(marker, tag, extension)
    }

    /// Writes a backup unless one already exists at its path.
    ///
    /// The same `(interface, marker, tag)` always maps to the same path. The
    /// first write wins: a retried attempt finds the object its predecessor
    /// wrote and gets that content back instead of replacing it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreWrite`] if the write fails.
    pub async fn write_backup(
        &self,
        interface: InterfaceOrigin,
        marker: &str,
        tag: &str,
        content: Bytes,
        extension: &str,
    ) -> Result<Backup> {
        let path = self.backup_path(interface, marker, tag, extension);
        let written = self
            .storage
            .put(&path, content.clone(), WritePrecondition::DoesNotExist)
            .await
            .map_err(|e| Error::StoreWrite {
                path: path.clone(),
                message: e.to_string(),
            })?;
        match written {
            WriteResult::Success { .. } => {
                tracing::info!(interface = %interface, path = %path, "wrote backup");
                Ok(Backup {
                    path,
                    content,
                    reused: false,
                })
            }
            WriteResult::PreconditionFailed { .. } => {
                let content = self.read_object(&path).await?;
                tracing::info!(interface = %interface, path = %path, "kept existing backup");
                Ok(Backup {
                    path,
                    content,
                    reused: true,
                })
            }
        }
    }

    /// Lists backups of `interface`, newest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error if listing fails.
    pub async fn list_backups(&self, interface: InterfaceOrigin) -> Result<Vec<BackupEntry>> {
        let prefix = BundlePaths::new(interface).backup_prefix();
        let mut backups: Vec<BackupEntry> = self
            .storage
            .list(&prefix)
            .await?
            .into_iter()
            .map(|meta| BackupEntry {
                path: meta.path,
                size: meta.size,
                last_modified: meta.last_modified,
            })
            .collect();
        backups.sort_by(|a, b| {
            b.last_modified
                .cmp(&a.last_modified)
                .then_with(|| b.path.cmp(&a.path))
        });
        Ok(backups)
    }

    async fn write(&self, path: &str, content: Bytes) -> Result<()> {
        match self.storage.put(path, content, WritePrecondition::None).await {
            Ok(WriteResult::Success { .. }) => Ok(()),
            Ok(WriteResult::PreconditionFailed { current_version }) => Err(Error::StoreWrite {
                path: path.to_string(),
                message: format!("unconditional write rejected at version {current_version}"),
            }),
            Err(e) => Err(Error::StoreWrite {
                path: path.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lingo_core::MemoryBackend;

    async fn gateway_with(objects: &[(&str, &str)]) -> BundleGateway {
        let storage = Arc::new(MemoryBackend::new());
        for (path, body) in objects {
            storage
                .put(path, Bytes::from(body.to_string()), WritePrecondition::None)
                .await
                .unwrap();
        }
        BundleGateway::new(storage)
    }

    #[tokio::test]
    async fn lists_only_bundles_in_order() {
        let gateway = gateway_with(&[
            ("migrations/mobile/b.json", "{}"),
            ("migrations/mobile/a.json", "{}"),
            ("migrations/mobile/current.json", "{}"),
            ("migrations/mobile/manifest.json", "{}"),
            ("migrations/mobile/readme.md", ""),
            ("migrations/web_financer/c.json", "{}"),
        ])
        .await;

        let names = gateway.list_bundles(InterfaceOrigin::Mobile).await.unwrap();
        assert_eq!(names, vec!["a.json", "b.json"]);
    }

    #[tokio::test]
    async fn missing_bundle_is_object_not_found() {
        let gateway = gateway_with(&[]).await;
        let err = gateway.read(InterfaceOrigin::Mobile, "a.json").await.unwrap_err();
        assert!(matches!(
            err,
            Error::ObjectNotFound { ref path } if path == "migrations/mobile/a.json"
        ));
        assert!(!gateway.exists(InterfaceOrigin::Mobile, "a.json").await.unwrap());
    }

    #[tokio::test]
    async fn missing_current_falls_back_to_baseline() {
        let gateway = gateway_with(&[]).await;
        let current = gateway
            .read_current_or_baseline(InterfaceOrigin::WebBeneficiary)
            .await
            .unwrap();
        assert_eq!(current.as_ref(), EMPTY_BASELINE);
    }

    #[tokio::test]
    async fn backup_write_keeps_the_first_attempt() {
        let gateway = gateway_with(&[]).await;
        let mobile = InterfaceOrigin::Mobile;
        let first = gateway
            .write_backup(mobile, BACKUP_MARKER, "v1-m1", Bytes::from("{}"), "json")
            .await
            .unwrap();
        let retry = gateway
            .write_backup(mobile, BACKUP_MARKER, "v1-m1", Bytes::from(r#"{"a":1}"#), "json")
            .await
            .unwrap();
        let other = gateway
            .write_backup(mobile, BACKUP_MARKER, "v1-m2", Bytes::from("{}"), "json")
            .await
            .unwrap();

        assert!(!first.reused);
        assert!(retry.reused);
        assert_eq!(first.path, retry.path);
        assert_ne!(first.path, other.path);
        assert_eq!(retry.content, Bytes::from("{}"));
        assert_eq!(gateway.read_object(&first.path).await.unwrap(), Bytes::from("{}"));
    }

    #[tokio::test]
    async fn lists_backups_of_one_interface() {
        let gateway = gateway_with(&[
            ("backups/mobile/mobile_before-apply-migration_v1-m1.json", "{}"),
            ("backups/mobile/mobile_before-apply-migration_v2-m2.json", "{}"),
            ("backups/web_financer/web_financer_before-apply-migration_v1-m3.json", "{}"),
        ])
        .await;

        let backups = gateway.list_backups(InterfaceOrigin::Mobile).await.unwrap();
        let paths: Vec<_> = backups.iter().map(|b| b.path.as_str()).collect();
        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|p| p.starts_with("backups/mobile/")));
        assert!(backups[0].last_modified >= backups[1].last_modified);
    }

    #[tokio::test]
    async fn missing_manifest_is_none() {
        let gateway = gateway_with(&[]).await;
        assert!(gateway.read_manifest(InterfaceOrigin::Mobile).await.unwrap().is_none());
    }
}
