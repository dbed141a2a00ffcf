//! Observability metrics for the migration engine.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `lingo_migrate_outcomes_total` | Counter | `operation`, `result` | Apply/rollback outcomes |
//! | `lingo_migrate_apply_duration_seconds` | Histogram | `result` | Time spent in one apply |
//! | `lingo_migrate_dispatches_total` | Counter | `job`, `result` | Enqueue outcomes |
//! | `lingo_migrate_job_retries_total` | Counter | `job` | Retries scheduled |
//! | `lingo_migrate_jobs_exhausted_total` | Counter | `job` | Jobs that ran out of attempts |
//! | `lingo_migrate_queue_depth` | Gauge | `queue` | Jobs waiting in the queue |
//! | `lingo_migrate_bundles_discovered_total` | Counter | `interface` | New ledger records |
//! | `lingo_migrate_reconcile_runs_total` | Counter | `status` | Reconcile triggers |
//!
//! Metrics go through the `metrics` facade. The API server installs a
//! Prometheus recorder and serves them at `/metrics`.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: apply/rollback outcomes.
    pub const OUTCOMES_TOTAL: &str = "lingo_migrate_outcomes_total";
    /// Histogram: apply duration in seconds.
    pub const APPLY_DURATION_SECONDS: &str = "lingo_migrate_apply_duration_seconds";
    /// Counter: enqueue outcomes.
    pub const DISPATCHES_TOTAL: &str = "lingo_migrate_dispatches_total";
    /// Counter: retries scheduled.
    pub const JOB_RETRIES_TOTAL: &str = "lingo_migrate_job_retries_total";
    /// Counter: jobs that exhausted their attempts.
    pub const JOBS_EXHAUSTED_TOTAL: &str = "lingo_migrate_jobs_exhausted_total";
    /// Gauge: jobs waiting in the queue.
    pub const QUEUE_DEPTH: &str = "lingo_migrate_queue_depth";
    /// Counter: newly discovered bundles.
    pub const BUNDLES_DISCOVERED_TOTAL: &str = "lingo_migrate_bundles_discovered_total";
    /// Counter: reconciliation triggers by outcome.
    pub const RECONCILE_RUNS_TOTAL: &str = "lingo_migrate_reconcile_runs_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Operation (apply, rollback).
    pub const OPERATION: &str = "operation";
    /// Result (applied, failed, rolled_back, enqueued, deduplicated, ...).
    pub const RESULT: &str = "result";
    /// Job kind.
    pub const JOB: &str = "job";
    /// Queue name.
    pub const QUEUE: &str = "queue";
    /// Interface.
    pub const INTERFACE: &str = "interface";
    /// Outcome status (completed, throttled, disabled).
    pub const STATUS: &str = "status";
}

/// Registers descriptions for every engine metric with the installed recorder.
pub fn register_metrics() {
    describe_counter!(names::OUTCOMES_TOTAL, "Apply and rollback outcomes");
    describe_histogram!(
        names::APPLY_DURATION_SECONDS,
        "Time spent applying one migration in seconds"
    );
    describe_counter!(names::DISPATCHES_TOTAL, "Job enqueue outcomes");
    describe_counter!(names::JOB_RETRIES_TOTAL, "Job retries scheduled");
    describe_counter!(names::JOBS_EXHAUSTED_TOTAL, "Jobs that ran out of attempts");
    describe_gauge!(names::QUEUE_DEPTH, "Jobs waiting in the queue");
    describe_counter!(
        names::BUNDLES_DISCOVERED_TOTAL,
        "Bundles recorded in the ledger by discovery"
    );
    describe_counter!(names::RECONCILE_RUNS_TOTAL, "Reconciliation triggers by outcome");
}

/// Records migration engine metrics with consistent labels.
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrateMetrics;

impl MigrateMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Records an apply or rollback outcome.
    pub fn record_outcome(&self, operation: &'static str, result: &'static str) {
        counter!(
            names::OUTCOMES_TOTAL,
            labels::OPERATION => operation,
            labels::RESULT => result,
        )
        .increment(1);
    }

    /// Records how long an apply took.
    pub fn observe_apply_duration(&self, result: &'static str, duration: Duration) {
        histogram!(
            names::APPLY_DURATION_SECONDS,
            labels::RESULT => result,
        )
        .record(duration.as_secs_f64());
    }

    /// Records an enqueue outcome.
    pub fn record_dispatch(&self, job: &'static str, result: &'static str) {
        counter!(
            names::DISPATCHES_TOTAL,
            labels::JOB => job,
            labels::RESULT => result,
        )
        .increment(1);
    }

    /// Records a scheduled retry.
    pub fn record_retry(&self, job: &'static str) {
        counter!(names::JOB_RETRIES_TOTAL, labels::JOB => job).increment(1);
    }

    /// Records a job that ran out of attempts.
    pub fn record_exhausted(&self, job: &'static str) {
        counter!(names::JOBS_EXHAUSTED_TOTAL, labels::JOB => job).increment(1);
    }

    /// Sets the queue depth gauge.
    #[allow(clippy::cast_precision_loss)] // Queue depths are small
    pub fn set_queue_depth(&self, queue: &str, depth: usize) {
        gauge!(names::QUEUE_DEPTH, labels::QUEUE => queue.to_string()).set(depth as f64);
    }

    /// Records newly discovered bundles.
    pub fn record_discovered(&self, interface: &'static str, count: usize) {
        counter!(names::BUNDLES_DISCOVERED_TOTAL, labels::INTERFACE => interface)
            .increment(count as u64);
    }

    /// Records a reconciliation trigger outcome.
    pub fn record_reconcile(&self, status: &'static str) {
        counter!(names::RECONCILE_RUNS_TOTAL, labels::STATUS => status).increment(1);
    }
}
