//! Reconciliation after schema migrations.
//!
//! Triggered once per "migrations completed" signal. A run:
//!
//! 1. Stops if the environment or the configuration disables auto-sync.
//! 2. Takes the throttle lease. If another run holds it, alerts and stops.
//! 3. Per interface: discovers new bundles, then enqueues one auto-process
//!    job if anything is pending. The job applies the manifest gate.
//! 4. Sends a summary alert.
//!
//! The lease is never released by the run itself; it expires after the
//! throttle interval.

use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::Instrument as _;

use lingo_core::observability::reconcile_span;
use lingo_core::{Environment, InterfaceOrigin, Lease, LeaseOutcome, RunId, StorageBackend};

use crate::alerts::Alerter;
use crate::dispatcher::JobDispatcher;
use crate::error::Result;
use crate::ledger::Ledger;
use crate::metrics::MigrateMetrics;
use crate::sync::{BundleSynchronizer, DiscoveryContext};

/// Default minimum interval between runs.
pub const DEFAULT_THROTTLE: Duration = Duration::from_secs(300);

/// Default object path of the throttle lease.
pub const DEFAULT_LEASE_PATH: &str = "locks/translation-reconcile.lease";

/// Reconciliation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Environment the process runs in.
    pub environment: Environment,
    /// Operator switch; false disables reconciliation everywhere.
    pub auto_sync_enabled: bool,
    /// Minimum interval between runs.
    pub throttle: Duration,
    /// Interfaces to reconcile.
    pub interfaces: Vec<InterfaceOrigin>,
    /// Object path of the throttle lease.
    pub lease_path: String,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            auto_sync_enabled: true,
            throttle: DEFAULT_THROTTLE,
            interfaces: InterfaceOrigin::ALL.to_vec(),
            lease_path: DEFAULT_LEASE_PATH.to_string(),
        }
    }
}

/// Per-interface counts of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceRunStats {
    /// Interface.
    pub interface: InterfaceOrigin,
    /// New records created.
    pub files_synced: usize,
    /// Jobs enqueued.
    pub jobs_dispatched: usize,
    /// Error that stopped this interface, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One reconciliation pass. Reported through logs and alerts only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationRun {
    /// Run identifier.
    pub run_id: RunId,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Per-interface counts.
    pub interfaces: Vec<InterfaceRunStats>,
    /// True if every interface succeeded.
    pub success: bool,
}

impl ReconciliationRun {
    /// Total records created.
    #[must_use]
    pub fn files_synced(&self) -> usize {
        self.interfaces.iter().map(|s| s.files_synced).sum()
    }

    /// Total jobs enqueued.
    #[must_use]
    pub fn jobs_dispatched(&self) -> usize {
        self.interfaces.iter().map(|s| s.jobs_dispatched).sum()
    }

    fn summary(&self, environment: Environment) -> String {
        let mut message = if self.success {
            format!("Translation reconciliation completed in {environment} (run {}).", self.run_id)
        } else {
            format!(
                "Translation reconciliation finished with errors in {environment} (run {}).",
                self.run_id
            )
        };
        for stats in &self.interfaces {
            let _ = write!(
                message,
                "\n- {}: {} file(s) synced, {} job(s) dispatched",
                stats.interface, stats.files_synced, stats.jobs_dispatched
            );
            if let Some(error) = &stats.error {
                let _ = write!(message, ", error: {error}");
            }
        }
        message
    }
}

/// What a trigger did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Reconciliation does not run here.
    Disabled {
        /// Why.
        reason: String,
    },
    /// A previous run holds the throttle lease.
    Throttled {
        /// When the lease expires.
        until: DateTime<Utc>,
    },
    /// A run completed.
    Completed(ReconciliationRun),
}

impl ReconcileOutcome {
    /// Returns a short label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Disabled { .. } => "disabled",
            Self::Throttled { .. } => "throttled",
            Self::Completed(run) if run.success => "completed",
            Self::Completed(_) => "completed_with_errors",
        }
    }
}

/// Runs reconciliation passes.
pub struct ReconciliationController {
    config: ReconcileConfig,
    lease: Lease<dyn StorageBackend>,
    ledger: Arc<dyn Ledger>,
    synchronizer: BundleSynchronizer,
    dispatcher: JobDispatcher,
    alerter: Alerter,
    metrics: MigrateMetrics,
}

impl fmt::Debug for ReconciliationController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconciliationController")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ReconciliationController {
    /// Creates a controller. The throttle lease lives in `storage`.
    #[must_use]
    pub fn new(
        config: ReconcileConfig,
        storage: Arc<dyn StorageBackend>,
        ledger: Arc<dyn Ledger>,
        synchronizer: BundleSynchronizer,
        dispatcher: JobDispatcher,
        alerter: Alerter,
    ) -> Self {
        let lease = Lease::new(storage, config.lease_path.clone());
        Self {
            config,
            lease,
            ledger,
            synchronizer,
            dispatcher,
            alerter,
            metrics: MigrateMetrics::new(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Handles a "migrations completed" signal.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the throttle lease cannot be read or
    /// written. Per-interface failures are reported in the run instead.
    pub async fn on_migrations_completed(&self) -> Result<ReconcileOutcome> {
        let outcome = self.trigger().await?;
        self.metrics.record_reconcile(outcome.label());
        Ok(outcome)
    }

    async fn trigger(&self) -> Result<ReconcileOutcome> {
        let environment = self.config.environment;
        if !environment.allows_auto_sync() {
            let reason = format!("auto-sync does not run in {environment}");
            tracing::info!(environment = %environment, "{reason}");
            return Ok(ReconcileOutcome::Disabled { reason });
        }
        if !self.config.auto_sync_enabled {
            let reason = "auto-sync disabled by configuration".to_string();
            tracing::info!(environment = %environment, "{reason}");
            return Ok(ReconcileOutcome::Disabled { reason });
        }

        let purpose = Some("translation reconciliation".to_string());
        match self.lease.try_acquire(self.config.throttle, purpose).await? {
            LeaseOutcome::Held(info) => {
                tracing::info!(
                    environment = %environment,
                    holder = %info.holder_id,
                    until = %info.expires_at,
                    "reconciliation throttled"
                );
                self.alerter
                    .notify(&format!(
                        "Translation reconciliation throttled in {environment}: \
                         a run started at {} holds the lock until {}. \
                         This trigger was skipped.",
                        info.acquired_at.to_rfc3339(),
                        info.expires_at.to_rfc3339(),
                    ))
                    .await;
                Ok(ReconcileOutcome::Throttled {
                    until: info.expires_at,
                })
            }
            LeaseOutcome::Acquired(_) => {
                let run_id = RunId::generate();
                let span = reconcile_span(&run_id.to_string(), environment.as_str());
                let run = self.run(run_id).instrument(span).await;
                self.alerter.notify(&run.summary(environment)).await;
                Ok(ReconcileOutcome::Completed(run))
            }
        }
    }

    async fn run(&self, run_id: RunId) -> ReconciliationRun {
        let environment = self.config.environment;
        let started_at = Utc::now();
        tracing::info!(interfaces = self.config.interfaces.len(), "reconciliation started");

        let mut interfaces = Vec::with_capacity(self.config.interfaces.len());
        for interface in &self.config.interfaces {
            let stats = match self.reconcile_interface(*interface, environment).await {
                Ok(stats) => stats,
                Err(e) => {
                    tracing::error!(
                        interface = %interface,
                        error = %e,
                        "interface reconciliation failed"
                    );
                    InterfaceRunStats {
                        interface: *interface,
                        files_synced: 0,
                        jobs_dispatched: 0,
                        error: Some(e.to_string()),
                    }
                }
            };
            interfaces.push(stats);
        }

        let run = ReconciliationRun {
            run_id,
            started_at,
            finished_at: Utc::now(),
            success: interfaces.iter().all(|s| s.error.is_none()),
            interfaces,
        };
        tracing::info!(
            files_synced = run.files_synced(),
            jobs_dispatched = run.jobs_dispatched(),
            success = run.success,
            "reconciliation finished"
        );
        run
    }

    async fn reconcile_interface(
        &self,
        interface: InterfaceOrigin,
        environment: Environment,
    ) -> Result<InterfaceRunStats> {
        let report = self
            .synchronizer
            .sync_interface(interface, &DiscoveryContext::reconcile(environment))
            .await?;

        let pending = self.ledger.pending_for_interface(interface).await?;
        let jobs_dispatched = if pending.is_empty() {
            0
        } else {
            usize::from(
                self.dispatcher
                    .dispatch_auto_process(interface, environment)
                    .await?
                    .is_enqueued(),
            )
        };

        Ok(InterfaceRunStats {
            interface,
            files_synced: report.synced(),
            jobs_dispatched,
            error: None,
        })
    }
}
