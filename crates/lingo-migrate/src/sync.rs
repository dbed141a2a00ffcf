//! Bundle discovery.
//!
//! Lists the bundles of an interface and creates a `pending` record for each
//! one the ledger has not seen. The checksum is captured here and never
//! changes afterwards. Re-running discovery over unchanged storage creates
//! nothing.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use lingo_core::{BundlePaths, Environment, InterfaceOrigin, MigrationId};

use crate::checksum::ChecksumVerifier;
use crate::error::{Error, Result};
use crate::gateway::BundleGateway;
use crate::ledger::Ledger;
use crate::metrics::MigrateMetrics;
use crate::record::{MigrationMetadata, NewMigration, extract_version};

/// Trigger recorded for discovery run by reconciliation.
pub const RECONCILE_TRIGGER: &str = "migrations_ended";

/// Where a discovery pass came from, recorded on every new record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryContext {
    /// Whether applies may be dispatched for what is found.
    pub auto_process: bool,
    /// What triggered the pass.
    pub trigger: Option<String>,
    /// Environment the pass ran in.
    pub environment: Option<Environment>,
}

impl DiscoveryContext {
    /// Context for a manual sync request.
    #[must_use]
    pub fn manual(auto_process: bool) -> Self {
        Self {
            auto_process,
            trigger: None,
            environment: None,
        }
    }

    /// Context for a reconciliation pass.
    #[must_use]
    pub fn reconcile(environment: Environment) -> Self {
        Self {
            auto_process: true,
            trigger: Some(RECONCILE_TRIGGER.to_string()),
            environment: Some(environment),
        }
    }
}

/// Result of one discovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Interface scanned.
    pub interface: Option<InterfaceOrigin>,
    /// Bundles found in storage.
    pub discovered: usize,
    /// Records created by this pass.
    pub created: Vec<MigrationId>,
    /// Bundles already in the ledger.
    pub skipped_existing: usize,
}

impl SyncReport {
    /// Returns the number of new records.
    #[must_use]
    pub fn synced(&self) -> usize {
        self.created.len()
    }
}

/// Discovers bundles and records them in the ledger.
#[derive(Clone)]
pub struct BundleSynchronizer {
    ledger: Arc<dyn Ledger>,
    gateway: BundleGateway,
    verifier: ChecksumVerifier,
    metrics: MigrateMetrics,
}

impl fmt::Debug for BundleSynchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleSynchronizer").finish_non_exhaustive()
    }
}

impl BundleSynchronizer {
    /// Creates a synchronizer.
    #[must_use]
    pub fn new(
        ledger: Arc<dyn Ledger>,
        gateway: BundleGateway,
        verifier: ChecksumVerifier,
    ) -> Self {
        Self {
            ledger,
            gateway,
            verifier,
            metrics: MigrateMetrics::new(),
        }
    }

    /// Records every bundle of `interface` the ledger does not know yet.
    ///
    /// # Errors
    ///
    /// Returns a storage error if listing or reading bundles fails. Records
    /// created before the failure stay; the next pass picks up the rest.
    pub async fn sync_interface(
        &self,
        interface: InterfaceOrigin,
        context: &DiscoveryContext,
    ) -> Result<SyncReport> {
        let names = self.gateway.list_bundles(interface).await?;
        let paths = BundlePaths::new(interface);
        let mut report = SyncReport {
            interface: Some(interface),
            discovered: names.len(),
            ..SyncReport::default()
        };

        for filename in names {
            if self.ledger.exists(interface, &filename).await? {
                report.skipped_existing += 1;
                continue;
            }

            let content = self.gateway.read(interface, &filename).await?;
            let now = Utc::now();
            let checksum = self.verifier.compute(&content);
            let version = extract_version(&filename, now);

            let mut metadata = MigrationMetadata::new();
            metadata.source_path = Some(paths.bundle(&filename)?);
            metadata.synced_at = Some(now);
            metadata.auto_process = Some(context.auto_process);
            metadata.automation_trigger.clone_from(&context.trigger);
            metadata.environment = context.environment.map(|e| e.as_str().to_string());

            let new = NewMigration {
                interface_origin: interface,
                filename: filename.clone(),
                version: version.clone(),
                checksum: checksum.clone(),
                metadata,
            };
            match self.ledger.insert(new).await {
                Ok(record) => {
                    tracing::info!(
                        interface = %interface,
                        filename = %filename,
                        version = %version,
                        checksum = %checksum.get(..8).unwrap_or(&checksum),
                        migration_id = %record.id,
                        "bundle discovered"
                    );
                    report.created.push(record.id);
                }
                Err(Error::DuplicateRecord { .. }) => {
                    report.skipped_existing += 1;
                }
                Err(e) => return Err(e),
            }
        }

        self.metrics
            .record_discovered(interface.as_str(), report.created.len());
        tracing::debug!(
            interface = %interface,
            discovered = report.discovered,
            synced = report.synced(),
            skipped = report.skipped_existing,
            "discovery pass finished"
        );
        Ok(report)
    }
}
