//! Observability infrastructure for Lingo.
//!
//! Structured logging with consistent spans across the migration engine,
//! the job worker and the HTTP layer.

use std::fmt;
use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{
    EnvFilter, fmt as fmt_layer, layer::SubscriberExt, util::SubscriberInitExt,
};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `lingo_migrate=debug`)
///
/// # Example
///
/// ```rust
/// use lingo_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt_layer::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt_layer::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for operations on a single migration record.
///
/// # Example
///
/// ```rust
/// use lingo_core::observability::migration_span;
///
/// let span = migration_span("apply", 42, "mobile");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn migration_span(operation: &str, migration_id: u64, interface: &str) -> Span {
    tracing::info_span!(
        "migration",
        op = operation,
        migration_id = migration_id,
        interface = interface,
    )
}

/// Creates a span for a reconciliation run.
#[must_use]
pub fn reconcile_span(run_id: &str, environment: &str) -> Span {
    tracing::info_span!("reconcile", run_id = run_id, environment = environment)
}

/// Wrapper that hides a secret from `Debug` and `Display` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Redacted<T>(pub T);

impl<T> Redacted<T> {
    /// Returns the wrapped secret.
    #[must_use]
    pub const fn expose(&self) -> &T {
        &self.0
    }
}

impl<T> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_succeeds() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Pretty);
    }

    #[test]
    fn test_span_helpers_create_spans() {
        let span = migration_span("apply", 7, "mobile");
        let _guard = span.enter();
        tracing::info!("inside migration span");

        let span = reconcile_span("01HZ", "production");
        let _guard = span.enter();
        tracing::info!("inside reconcile span");
    }

    #[test]
    fn test_redacted_hides_value() {
        let secret = Redacted("hunter2".to_string());
        assert_eq!(format!("{secret:?}"), "[REDACTED]");
        assert_eq!(secret.to_string(), "[REDACTED]");
        assert_eq!(secret.expose(), "hunter2");
    }
}
