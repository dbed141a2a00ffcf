//! `lingo` command-line interface.
//!
//! - `lingo serve` - HTTP API with the in-process worker pool
//! - `lingo reconcile` - one reconciliation pass, jobs drained in process
//! - `lingo apply <id>` - apply one migration and wait for the outcome
//! - `lingo rollback <id> --reason <text>` - roll one migration back and wait
//!
//! Every command reads the `LINGO_*` environment described in [`crate::config`].

#![allow(clippy::print_stdout)]

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};

use lingo_core::{MemoryBackend, MigrationId, ObjectStoreBackend, StorageBackend};
use lingo_migrate::applier::ApplyOptions;
use lingo_migrate::engine::MigrationEngine;
use lingo_migrate::reconcile::ReconcileOutcome;
use lingo_migrate::record::{MigrationRecord, MigrationStatus};

use crate::config::Config;
use crate::server::{Server, engine_for};

/// Lingo - translation migration engine.
#[derive(Debug, Parser)]
#[command(name = "lingo")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Serve the HTTP API.
    Serve,
    /// Run one reconciliation pass and process the jobs it dispatches.
    Reconcile,
    /// Apply one migration.
    Apply(ApplyArgs),
    /// Roll one migration back.
    Rollback(RollbackArgs),
}

/// Arguments of `lingo apply`.
#[derive(Debug, Args)]
pub struct ApplyArgs {
    /// Migration ID.
    pub id: u64,
    /// Skip the backup of live content (the migration cannot be rolled back).
    #[arg(long)]
    pub no_backup: bool,
    /// Skip checksum validation.
    #[arg(long)]
    pub skip_checksum: bool,
}

/// Arguments of `lingo rollback`.
#[derive(Debug, Args)]
pub struct RollbackArgs {
    /// Migration ID.
    pub id: u64,
    /// Why the migration is rolled back.
    #[arg(long)]
    pub reason: String,
}

/// Opens the storage backend described by `config`.
///
/// # Errors
///
/// Returns an error if no bucket is configured outside debug mode, or the
/// bucket client cannot be built.
pub fn open_storage(config: &Config) -> Result<Arc<dyn StorageBackend>> {
    if let Some(bucket) = config.storage.bucket.as_deref() {
        tracing::info!(bucket = %bucket, "Using object storage backend");
        return Ok(Arc::new(ObjectStoreBackend::from_bucket(bucket)?));
    }
    if !config.debug {
        bail!("LINGO_STORAGE_BUCKET is required when LINGO_DEBUG=false");
    }
    tracing::warn!("LINGO_STORAGE_BUCKET not set; using in-memory storage backend (debug only)");
    Ok(Arc::new(MemoryBackend::new()))
}

/// Executes `command`.
///
/// # Errors
///
/// Returns the command's failure.
pub async fn execute(command: Commands, config: Config) -> Result<()> {
    let storage = open_storage(&config)?;
    match command {
        Commands::Serve => {
            Server::with_storage_backend(config, storage).serve().await?;
            Ok(())
        }
        Commands::Reconcile => reconcile(&engine_for(&config, storage)).await,
        Commands::Apply(args) => apply(&engine_for(&config, storage), &args).await,
        Commands::Rollback(args) => rollback(&engine_for(&config, storage), args).await,
    }
}

async fn reconcile(engine: &MigrationEngine) -> Result<()> {
    let outcome = engine.controller().on_migrations_completed().await?;
    match &outcome {
        ReconcileOutcome::Disabled { reason } => println!("reconciliation skipped: {reason}"),
        ReconcileOutcome::Throttled { until } => {
            println!("reconciliation throttled until {until}");
        }
        ReconcileOutcome::Completed(run) => {
            let processed = engine.worker().run_until_empty().await?;
            println!(
                "run {}: {} file(s) synced, {} job(s) dispatched, {processed} job(s) processed",
                run.run_id,
                run.files_synced(),
                run.jobs_dispatched()
            );
            if !run.success {
                bail!("reconciliation finished with errors");
            }
        }
    }
    Ok(())
}

async fn apply(engine: &MigrationEngine, args: &ApplyArgs) -> Result<()> {
    let id = MigrationId::new(args.id);
    let record = load(engine, id).await?;
    let options = ApplyOptions {
        create_backup: !args.no_backup,
        validate_checksum: !args.skip_checksum,
    };
    match record.status {
        MigrationStatus::Pending => engine.dispatcher().dispatch_apply(id, options).await?,
        MigrationStatus::Failed => engine.dispatcher().dispatch_reprocess(id, options).await?,
        status => bail!("migration {id} is {status} and cannot be applied"),
    };
    engine.worker().run_until_empty().await?;
    print_record(&load(engine, id).await?)
}

async fn rollback(engine: &MigrationEngine, args: RollbackArgs) -> Result<()> {
    let id = MigrationId::new(args.id);
    let reason = args.reason.trim().to_string();
    if reason.is_empty() {
        bail!("--reason must not be empty");
    }
    engine.dispatcher().dispatch_rollback(id, reason).await?;
    engine.worker().run_until_empty().await?;
    print_record(&load(engine, id).await?)
}

async fn load(engine: &MigrationEngine, id: MigrationId) -> Result<MigrationRecord> {
    engine
        .ledger()
        .get(id)
        .await?
        .with_context(|| format!("migration {id} not found"))
}

fn print_record(record: &MigrationRecord) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(record)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_apply_flags() {
        let cli = Cli::parse_from(["lingo", "apply", "7", "--skip-checksum"]);
        let Commands::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert_eq!(args.id, 7);
        assert!(!args.no_backup);
        assert!(args.skip_checksum);
    }

    #[test]
    fn rollback_requires_reason() {
        assert!(Cli::try_parse_from(["lingo", "rollback", "7"]).is_err());
        let cli = Cli::parse_from(["lingo", "rollback", "7", "--reason", "bad data"]);
        assert!(matches!(cli.command, Commands::Rollback(ref a) if a.reason == "bad data"));
    }

    #[test]
    fn storage_requires_bucket_outside_debug() {
        assert!(open_storage(&Config::default()).is_err());
        let config = Config {
            debug: true,
            ..Config::default()
        };
        assert!(open_storage(&config).is_ok());
    }
}
