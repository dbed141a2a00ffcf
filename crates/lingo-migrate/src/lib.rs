//! # lingo-migrate
//!
//! Translation migration engine: deploys versioned translation bundles
//! from object storage into live content, verifies them, backs up what they
//! replace, and rolls them back on request.
//!
//! ## Components
//!
//! - **Ledger**: one record per `(interface, filename)` with a lifecycle
//!   state machine ([`record`], [`ledger`])
//! - **Checksum verifier**: digest comparison and bundle parsing ([`checksum`])
//! - **Bundle gateway**: bundles, live content and backups in storage ([`gateway`])
//! - **Applier**: backup-then-apply and restore-from-backup ([`applier`])
//! - **Dispatch**: uniquely keyed jobs with retry ([`job`], [`dispatch`],
//!   [`dispatcher`], [`retry`], [`worker`])
//! - **Reconciliation**: discovery and policy-driven apply after deploys
//!   ([`sync`], [`manifest`], [`reconcile`], [`alerts`])
//!
//! ## Lifecycle
//!
//! ```text
//! pending ──► completed ──► rolled_back
//!    │  ▲
//!    ▼  │ (manual reprocess)
//!  failed
//! ```
//!
//! ## Guarantees
//!
//! - **At most one live job per migration**: apply and rollback of the same
//!   record share a uniqueness key
//! - **Checksum before write**: a tampered bundle never reaches backup or apply
//! - **Reversible**: every backed-up apply can be rolled back; rollback is
//!   all-or-nothing
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use lingo_core::{InterfaceOrigin, MemoryBackend};
//! use lingo_migrate::engine::MigrationEngine;
//!
//! # async fn example() -> lingo_migrate::error::Result<()> {
//! let engine = MigrationEngine::builder(Arc::new(MemoryBackend::new())).build();
//! engine
//!     .dispatcher()
//!     .dispatch_sync(InterfaceOrigin::Mobile, true)
//!     .await?;
//! engine.worker().run_until_idle().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod alerts;
pub mod applier;
pub mod checksum;
pub mod content;
pub mod dispatch;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod events;
pub mod gateway;
pub mod job;
pub mod ledger;
pub mod manifest;
pub mod metrics;
pub mod reconcile;
pub mod record;
pub mod retry;
pub mod sync;
pub mod worker;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::alerts::{AlertChannel, Alerter, LogAlertChannel, WebhookAlertChannel};
    pub use crate::applier::{ApplyOptions, MigrationApplier, MigrationOutcome};
    pub use crate::checksum::{ChecksumVerifier, Digester, TranslationBundle};
    pub use crate::content::{ApplySummary, ContentApplier, StoreContentApplier};
    pub use crate::dispatch::{EnqueueResult, InMemoryJobQueue, JobQueue};
    pub use crate::dispatcher::JobDispatcher;
    pub use crate::engine::{EngineBuilder, MigrationEngine};
    pub use crate::error::{Error, ErrorClass, Result};
    pub use crate::events::{EventSink, MigrationEvent};
    pub use crate::gateway::BundleGateway;
    pub use crate::job::{JobEnvelope, JobKind};
    pub use crate::ledger::{
        CommitResult, InMemoryLedger, Ledger, ListFilter, ObjectStoreLedger, Page,
    };
    pub use crate::manifest::{ManifestSource, StoreManifest};
    pub use crate::metrics::MigrateMetrics;
    pub use crate::reconcile::{
        ReconcileConfig, ReconcileOutcome, ReconciliationController, ReconciliationRun,
    };
    pub use crate::record::{MigrationMetadata, MigrationRecord, MigrationStatus, NewMigration};
    pub use crate::retry::RetryPolicy;
    pub use crate::sync::{BundleSynchronizer, DiscoveryContext, SyncReport};
    pub use crate::worker::{JobHandler, JobOutput, MigrationWorker};
}
