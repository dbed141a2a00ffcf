//! Test storage with operation tracing.
//!
//! In-memory storage that records every operation and can fail on demand.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use lingo_core::error::{Error, Result};
use lingo_core::storage::{ObjectMeta, StorageBackend, WritePrecondition, WriteResult};

/// Record of a storage operation for test assertions.
#[derive(Debug, Clone)]
pub enum StorageOp {
    /// Get operation.
    Get {
        /// Path that was read.
        path: String,
    },
    /// Head operation (metadata only).
    Head {
        /// Path that was checked.
        path: String,
    },
    /// Put operation.
    Put {
        /// Path that was written.
        path: String,
        /// Size of data written.
        size: usize,
        /// Precondition used.
        precondition: WritePrecondition,
    },
    /// Delete operation.
    Delete {
        /// Path that was deleted.
        path: String,
    },
    /// List operation.
    List {
        /// Prefix that was listed.
        prefix: String,
    },
}

impl StorageOp {
    /// Returns the path or prefix the operation touched.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Get { path }
            | Self::Head { path }
            | Self::Put { path, .. }
            | Self::Delete { path }
            | Self::List { prefix: path } => path,
        }
    }
}

/// In-memory storage backend with operation tracing.
#[derive(Debug, Clone, Default)]
pub struct TracingMemoryBackend {
    data: Arc<Mutex<HashMap<String, StoredObject>>>,
    operations: Arc<Mutex<Vec<StorageOp>>>,
    fail_paths: Arc<Mutex<Vec<String>>>,
    latency: Option<Duration>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    version: i64,
    last_modified: DateTime<Utc>,
}

impl TracingMemoryBackend {
    /// Creates a new empty tracing storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates storage with simulated latency.
    #[must_use]
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Returns all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<StorageOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Returns recorded writes under `prefix`.
    #[must_use]
    pub fn puts_under(&self, prefix: &str) -> Vec<StorageOp> {
        self.operations()
            .into_iter()
            .filter(|op| matches!(op, StorageOp::Put { .. }) && op.path().starts_with(prefix))
            .collect()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().expect("lock").clear();
    }

    /// Injects a failure for the given path prefix.
    pub fn inject_failure(&self, path: impl Into<String>) {
        self.fail_paths.lock().expect("lock").push(path.into());
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        self.fail_paths.lock().expect("lock").clear();
    }

    /// Returns the stored bytes at `path`.
    #[must_use]
    pub fn contents(&self, path: &str) -> Option<Bytes> {
        self.data
            .lock()
            .expect("lock")
            .get(path)
            .map(|o| o.data.clone())
    }

    /// Returns all stored paths, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.data.lock().expect("lock").keys().cloned().collect();
        paths.sort();
        paths
    }

    fn record(&self, op: StorageOp) {
        self.operations.lock().expect("lock").push(op);
    }

    fn check_failure(&self, path: &str) -> Result<()> {
        let fail_paths = self.fail_paths.lock().expect("lock");
        if fail_paths.iter().any(|p| path.starts_with(p)) {
            return Err(Error::storage(format!("injected failure for path: {path}")));
        }
        Ok(())
    }

    async fn maybe_delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn meta(path: &str, object: &StoredObject) -> ObjectMeta {
        ObjectMeta {
            path: path.to_string(),
            size: object.data.len() as u64,
            version: object.version.to_string(),
            last_modified: Some(object.last_modified),
            etag: Some(format!("\"{}\"", object.version)),
        }
    }
}

#[async_trait::async_trait]
impl StorageBackend for TracingMemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        self.maybe_delay().await;
        self.check_failure(path)?;
        self.record(StorageOp::Get {
            path: path.to_string(),
        });

        let data = self.data.lock().expect("lock");
        data.get(path)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFound(format!("object not found: {path}")))
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        self.maybe_delay().await;
        self.check_failure(path)?;
        self.record(StorageOp::Head {
            path: path.to_string(),
        });

        let data = self.data.lock().expect("lock");
        Ok(data.get(path).map(|o| Self::meta(path, o)))
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        self.maybe_delay().await;
        self.check_failure(path)?;
        self.record(StorageOp::Put {
            path: path.to_string(),
            size: data.len(),
            precondition: precondition.clone(),
        });

        let mut store = self.data.lock().expect("lock");
        let existing = store.get(path);

        match &precondition {
            WritePrecondition::None => {}
            WritePrecondition::DoesNotExist => {
                if let Some(obj) = existing {
                    return Ok(WriteResult::PreconditionFailed {
                        current_version: obj.version.to_string(),
                    });
                }
            }
            WritePrecondition::MatchesVersion(expected) => {
                let expected_num: i64 = expected.parse().unwrap_or(-1);
                match existing {
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
        }

        let new_version = existing.map_or(1, |o| o.version + 1);
        store.insert(
            path.to_string(),
            StoredObject {
                data,
                version: new_version,
                last_modified: Utc::now(),
            },
        );

        Ok(WriteResult::Success {
            version: new_version.to_string(),
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.maybe_delay().await;
        self.check_failure(path)?;
        self.record(StorageOp::Delete {
            path: path.to_string(),
        });

        self.data.lock().expect("lock").remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        self.maybe_delay().await;
        self.check_failure(prefix)?;
        self.record(StorageOp::List {
            prefix: prefix.to_string(),
        });

        let data = self.data.lock().expect("lock");
        Ok(data
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| Self::meta(k, v))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_operations_in_order() {
        let storage = TracingMemoryBackend::new();

        storage
            .put("migrations/mobile/a.json", Bytes::from("{}"), WritePrecondition::None)
            .await
            .expect("put");
        let _ = storage.get("migrations/mobile/a.json").await;
        let _ = storage.list("migrations/").await;

        let ops = storage.operations();
        assert_eq!(ops.len(), 3);
        assert!(matches!(ops[0], StorageOp::Put { .. }));
        assert!(matches!(ops[1], StorageOp::Get { .. }));
        assert!(matches!(ops[2], StorageOp::List { .. }));
        assert_eq!(storage.puts_under("migrations/").len(), 1);
    }

    #[tokio::test]
    async fn injected_failures_match_prefix() {
        let storage = TracingMemoryBackend::new();
        storage.inject_failure("backups/");

        let result = storage
            .put("backups/mobile/x.json", Bytes::from("{}"), WritePrecondition::None)
            .await;
        assert!(result.is_err());

        storage
            .put("migrations/mobile/a.json", Bytes::from("{}"), WritePrecondition::None)
            .await
            .expect("put");
        storage.clear_failures();
        assert!(
            storage
                .put("backups/mobile/x.json", Bytes::from("{}"), WritePrecondition::None)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn conditional_writes() {
        let storage = TracingMemoryBackend::new();

        let result = storage
            .put("lock", Bytes::from("v1"), WritePrecondition::DoesNotExist)
            .await
            .expect("put");
        assert!(matches!(result, WriteResult::Success { ref version } if version == "1"));

        let result = storage
            .put("lock", Bytes::from("v2"), WritePrecondition::DoesNotExist)
            .await
            .expect("put");
        assert!(matches!(result, WriteResult::PreconditionFailed { .. }));

        let result = storage
            .put(
                "lock",
                Bytes::from("v2"),
                WritePrecondition::MatchesVersion("1".to_string()),
            )
            .await
            .expect("put");
        assert!(matches!(result, WriteResult::Success { ref version } if version == "2"));
    }
}
