//! Storage backend abstraction for object storage (S3-compatible, memory).
//!
//! Every durable artifact Lingo touches lives behind this contract: bundles,
//! live translation content, manifests, backups, the throttle lease and (in
//! production) the migration ledger itself.
//!
//! - Conditional writes with preconditions
//! - Object metadata including `last_modified` and `etag`
//!
//! The version token is an opaque `String`. S3 exposes an `ETag`, the memory
//! backend a counter. Callers only ever compare tokens for equality.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt as _;
use object_store::aws::{AmazonS3Builder, S3ConditionalPut};
use object_store::path::Path as StorePath;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload, UpdateVersion};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

/// Precondition for conditional writes (CAS operations).
#[derive(Debug, Clone)]
pub enum WritePrecondition {
    /// Write only if object does not exist.
    DoesNotExist,
    /// Write only if object's version matches the given token.
    MatchesVersion(String),
    /// Write unconditionally.
    None,
}

/// Result of a conditional write.
#[derive(Debug, Clone)]
pub enum WriteResult {
    /// Write succeeded, returns new version token.
    Success {
        /// The new version token after the write.
        version: String,
    },
    /// Precondition failed, returns current version token.
    PreconditionFailed {
        /// The current version that caused the precondition to fail.
        current_version: String,
    },
}

/// Metadata about a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Object path (key).
    pub path: String,
    /// Object size in bytes.
    pub size: u64,
    /// Object version token for CAS operations.
    pub version: String,
    /// Last modification timestamp.
    pub last_modified: Option<DateTime<Utc>>,
    /// Entity tag for cache validation.
    pub etag: Option<String>,
}

/// Storage backend trait for object storage.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Reads entire object.
    ///
    /// Returns `Error::NotFound` if object doesn't exist.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Writes with optional precondition.
    ///
    /// Returns `WriteResult::PreconditionFailed` if precondition not met.
    /// Never returns error for precondition failure - that's a normal result.
    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult>;

    /// Deletes an object.
    ///
    /// Succeeds even if object doesn't exist (idempotent).
    async fn delete(&self, path: &str) -> Result<()>;

    /// Lists objects with the given prefix.
    ///
    /// Returns empty vec if no objects match.
    ///
    /// **Ordering**: Results are returned in arbitrary order. Callers requiring
    /// deterministic order should sort by `path`.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Gets object metadata without reading content.
    ///
    /// Returns `None` if object doesn't exist.
    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>>;

    /// Returns true if an object exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.head(path).await?.is_some())
    }
}

/// In-memory storage backend for testing and debug mode.
///
/// Thread-safe via `RwLock`. Not suitable for production.
/// Uses numeric versions internally (stored as strings).
#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    version: i64,
    last_modified: DateTime<Utc>,
}

impl StoredObject {
    fn meta(&self, path: &str) -> ObjectMeta {
        ObjectMeta {
            path: path.to_string(),
            size: self.data.len() as u64,
            version: self.version.to_string(),
            last_modified: Some(self.last_modified),
            etag: Some(format!("\"{}\"", self.version)),
        }
    }
}

fn poisoned() -> Error {
    Error::Internal {
        message: "lock poisoned".into(),
    }
}

impl MemoryBackend {
    /// Creates a new empty memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let objects = self.objects.read().map_err(|_| poisoned())?;

        objects
            .get(path)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFound(format!("object not found: {path}")))
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let mut objects = self.objects.write().map_err(|_| poisoned())?;

        let current = objects.get(path);

        match precondition {
            WritePrecondition::DoesNotExist => {
                if let Some(obj) = current {
                    return Ok(WriteResult::PreconditionFailed {
                        current_version: obj.version.to_string(),
                    });
                }
            }
            WritePrecondition::MatchesVersion(expected) => {
                let expected_num: i64 = expected.parse().unwrap_or(-1);
                match current {
                    Some(obj) if obj.version != expected_num => {
                        return Ok(WriteResult::PreconditionFailed {
                            current_version: obj.version.to_string(),
                        });
                    }
                    None => {
                        return Ok(WriteResult::PreconditionFailed {
                            current_version: "0".to_string(),
                        });
                    }
                    _ => {}
                }
            }
            WritePrecondition::None => {}
        }

        let new_version = current.map_or(1, |o| o.version + 1);
        objects.insert(
            path.to_string(),
            StoredObject {
                data,
                version: new_version,
                last_modified: Utc::now(),
            },
        );
        drop(objects);

        Ok(WriteResult::Success {
            version: new_version.to_string(),
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.objects.write().map_err(|_| poisoned())?.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| poisoned())?;

        Ok(objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(path, obj)| obj.meta(path))
            .collect())
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| poisoned())?;
        Ok(objects.get(path).map(|obj| obj.meta(path)))
    }
}

/// Storage backend over any [`ObjectStore`], S3 in production.
///
/// Version tokens are the store's `ETag`s. Conditional writes map onto
/// `PutMode::Create` and `PutMode::Update`, so the bucket must support
/// conditional puts (`S3ConditionalPut::ETagMatch`).
///
/// ## Limitations
///
/// - Listing is segment based: `list("migrations/mobile/")` and
///   `list("migrations/mobile")` are equivalent.
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for ObjectStoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreBackend")
            .field("store", &self.store.to_string())
            .finish()
    }
}

impl ObjectStoreBackend {
    /// Wraps an existing object store.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Builds an S3 backend for `bucket` (`s3://name` or `name`).
    ///
    /// Credentials and region come from the standard `AWS_*` environment
    /// variables.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for an empty bucket name, or a storage
    /// error if the client cannot be configured.
    pub fn from_bucket(bucket: &str) -> Result<Self> {
        let name = bucket
            .strip_prefix("s3://")
            .unwrap_or(bucket)
            .trim_end_matches('/');
        if name.is_empty() {
            return Err(Error::InvalidInput("storage bucket name is empty".into()));
        }

        let store = AmazonS3Builder::from_env()
            .with_bucket_name(name)
            .with_conditional_put(S3ConditionalPut::ETagMatch)
            .build()
            .map_err(|e| Error::storage_with_source(format!("configure bucket {name}"), e))?;

        Ok(Self::new(Arc::new(store)))
    }

    async fn current_version(&self, location: &StorePath) -> Result<String> {
        match self.store.head(location).await {
            Ok(meta) => Ok(meta.e_tag.unwrap_or_default()),
            Err(object_store::Error::NotFound { .. }) => Ok("0".to_string()),
            Err(e) => Err(map_store_error(location, e)),
        }
    }
}

fn map_store_error(location: &StorePath, err: object_store::Error) -> Error {
    match err {
        object_store::Error::NotFound { .. } => {
            Error::NotFound(format!("object not found: {location}"))
        }
        other => Error::storage_with_source(format!("object store call on {location}"), other),
    }
}

fn to_meta(meta: object_store::ObjectMeta) -> ObjectMeta {
    ObjectMeta {
        path: meta.location.to_string(),
        size: u64::try_from(meta.size).unwrap_or(u64::MAX),
        version: meta.e_tag.clone().unwrap_or_default(),
        last_modified: Some(meta.last_modified),
        etag: meta.e_tag,
    }
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let location = StorePath::from(path);
        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| map_store_error(&location, e))?;
        result
            .bytes()
            .await
            .map_err(|e| map_store_error(&location, e))
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let location = StorePath::from(path);
        let mode = match precondition {
            WritePrecondition::DoesNotExist => PutMode::Create,
            WritePrecondition::MatchesVersion(version) => PutMode::Update(UpdateVersion {
                e_tag: Some(version),
                version: None,
            }),
            WritePrecondition::None => PutMode::Overwrite,
        };
        let opts = PutOptions {
            mode,
            ..PutOptions::default()
        };

        match self
            .store
            .put_opts(&location, PutPayload::from(data), opts)
            .await
        {
            Ok(put) => Ok(WriteResult::Success {
                version: put.e_tag.unwrap_or_default(),
            }),
            Err(
                object_store::Error::AlreadyExists { .. }
                | object_store::Error::Precondition { .. }
                | object_store::Error::NotFound { .. },
            ) => Ok(WriteResult::PreconditionFailed {
                current_version: self.current_version(&location).await?,
            }),
            Err(e) => Err(map_store_error(&location, e)),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let location = StorePath::from(path);
        match self.store.delete(&location).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(map_store_error(&location, e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let location = StorePath::from(prefix);
        let objects: Vec<object_store::ObjectMeta> = self
            .store
            .list(Some(&location))
            .try_collect()
            .await
            .map_err(|e| map_store_error(&location, e))?;
        Ok(objects.into_iter().map(to_meta).collect())
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let location = StorePath::from(path);
        match self.store.head(&location).await {
            Ok(meta) => Ok(Some(to_meta(meta))),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(map_store_error(&location, e)),
        }
    }
}
