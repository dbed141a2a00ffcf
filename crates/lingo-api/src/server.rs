//! API server implementation.
//!
//! Wires configuration, storage and the migration engine together, runs the
//! in-process worker pool and serves the HTTP surface.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use lingo_core::{MemoryBackend, Result, StorageBackend};
use lingo_migrate::alerts::{Alerter, LogAlertChannel, WebhookAlertChannel};
use lingo_migrate::engine::MigrationEngine;

use crate::config::Config;

const READY_CHECK_KEY: &str = "__lingo/ready-check";

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ReadyResponse {
    /// Service readiness status.
    pub ready: bool,
    /// Optional message about readiness state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Shared application state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Storage backend holding bundles, backups and the ledger.
    storage: Arc<dyn StorageBackend>,
    /// The migration engine.
    pub engine: MigrationEngine,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("storage", &"<StorageBackend>")
            .field("engine", &self.engine)
            .finish()
    }
}

impl AppState {
    /// Creates application state.
    #[must_use]
    pub fn new(config: Config, storage: Arc<dyn StorageBackend>, engine: MigrationEngine) -> Self {
        Self {
            config,
            storage,
            engine,
        }
    }

    /// Returns the storage backend.
    #[must_use]
    pub fn storage_backend(&self) -> Arc<dyn StorageBackend> {
        Arc::clone(&self.storage)
    }
}

/// Builds the engine described by `config` over `storage`.
#[must_use]
pub fn engine_for(config: &Config, storage: Arc<dyn StorageBackend>) -> MigrationEngine {
    let channel = config.alerts.channel.clone();
    let alerter = match config.alerts.webhook_url.as_ref() {
        Some(url) => {
            let webhook = WebhookAlertChannel::new(url.expose().clone());
            Alerter::new(Arc::new(webhook), channel)
        }
        None => Alerter::new(Arc::new(LogAlertChannel), channel),
    };
    MigrationEngine::builder(storage)
        .alerter(alerter)
        .reconcile_config(config.reconcile_config())
        .build()
}

/// Health check endpoint handler.
///
/// Returns 200 OK if the service is alive. Dependencies are not checked.
async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness check endpoint handler.
///
/// A `HEAD` on a missing key validates credentials and the network path
/// without listing the bucket.
async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.storage_backend().head(READY_CHECK_KEY).await {
        Ok(_) => (
            StatusCode::OK,
            Json(ReadyResponse {
                ready: true,
                message: None,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                ready: false,
                message: Some(format!("storage check failed: {e}")),
            }),
        ),
    }
}

/// The Lingo API server.
pub struct Server {
    config: Config,
    storage: Arc<dyn StorageBackend>,
    engine: MigrationEngine,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("storage", &"<StorageBackend>")
            .field("engine", &self.engine)
            .finish()
    }
}

impl Server {
    /// Creates a new server with the given configuration.
    ///
    /// Defaults to in-memory storage; use `with_storage_backend` for production.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_storage_backend(config, Arc::new(MemoryBackend::new()))
    }

    /// Creates a new server with an explicit storage backend.
    #[must_use]
    pub fn with_storage_backend(config: Config, storage: Arc<dyn StorageBackend>) -> Self {
        let engine = engine_for(&config, Arc::clone(&storage));
        Self {
            config,
            storage,
            engine,
        }
    }

    /// Creates a new `ServerBuilder`.
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the migration engine.
    #[must_use]
    pub fn engine(&self) -> &MigrationEngine {
        &self.engine
    }

    /// Creates the router with all routes and middleware.
    fn create_router(&self) -> Router {
        let state = Arc::new(AppState::new(
            self.config.clone(),
            Arc::clone(&self.storage),
            self.engine.clone(),
        ));

        let auth_layer =
            middleware::from_fn_with_state(Arc::clone(&state), crate::context::auth_middleware);
        let metrics_layer = middleware::from_fn(crate::metrics::metrics_middleware);

        Router::new()
            // Health, ready, and metrics endpoints (no auth required)
            .route("/health", get(health))
            .route("/ready", get(ready))
            .route("/metrics", get(crate::metrics::serve_metrics))
            .nest("/api/v1", crate::routes::api_v1_routes().layer(auth_layer))
            .layer(TraceLayer::new_for_http())
            .layer(metrics_layer)
            .with_state(state)
    }

    /// Starts the worker pool and the HTTP server, and blocks until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the port cannot be
    /// bound, or the server fails.
    pub async fn serve(&self) -> Result<()> {
        self.config.validate()?;
        crate::metrics::init_metrics();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let workers = self.spawn_workers(&shutdown_rx);
        if self.config.reconcile.on_start {
            self.spawn_reconcile();
        }

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let router = self.create_router();

        tracing::info!(
            http_port = self.config.http_port,
            environment = %self.config.environment,
            workers = self.config.worker_concurrency,
            "Starting Lingo API server"
        );

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| lingo_core::Error::Internal {
                message: format!("failed to bind to {addr}: {e}"),
            })?;

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| lingo_core::Error::Internal {
                message: format!("server error: {e}"),
            });

        let _ = shutdown_tx.send(true);
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "worker task ended abnormally");
            }
        }
        tracing::info!("Lingo API server stopped");
        served
    }

    #[doc(hidden)]
    pub fn test_router(&self) -> Router {
        self.create_router()
    }

    fn spawn_workers(&self, shutdown: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        (0..self.config.worker_concurrency)
            .map(|index| {
                let worker = self.engine.worker();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    tracing::debug!(worker = index, "queue worker started");
                    worker.run(shutdown).await;
                    tracing::debug!(worker = index, "queue worker stopped");
                })
            })
            .collect()
    }

    fn spawn_reconcile(&self) {
        let controller = Arc::clone(self.engine.controller());
        tokio::spawn(async move {
            match controller.on_migrations_completed().await {
                Ok(outcome) => {
                    tracing::info!(outcome = outcome.label(), "startup reconciliation finished");
                }
                Err(e) => tracing::error!(error = %e, "startup reconciliation failed"),
            }
        });
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

/// Builder for [`Server`].
pub struct ServerBuilder {
    config: Config,
    storage: Arc<dyn StorageBackend>,
    engine: Option<MigrationEngine>,
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("storage", &"<StorageBackend>")
            .field("engine", &self.engine.is_some())
            .finish()
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            storage: Arc::new(MemoryBackend::new()),
            engine: None,
        }
    }
}

impl ServerBuilder {
    /// Creates a builder with default configuration and in-memory storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Sets the HTTP port.
    #[must_use]
    pub fn http_port(mut self, port: u16) -> Self {
        self.config.http_port = port;
        self
    }

    /// Enables or disables debug mode.
    #[must_use]
    pub fn debug(mut self, enabled: bool) -> Self {
        self.config.debug = enabled;
        self
    }

    /// Sets the admin token required on migration routes.
    #[must_use]
    pub fn admin_token(mut self, token: impl Into<String>) -> Self {
        self.config.admin_token = Some(lingo_core::Redacted(token.into()));
        self
    }

    /// Sets the storage backend.
    #[must_use]
    pub fn storage_backend(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = storage;
        self
    }

    /// Uses a pre-assembled engine instead of building one from the configuration.
    #[must_use]
    pub fn engine(mut self, engine: MigrationEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Builds the server.
    #[must_use]
    pub fn build(self) -> Server {
        let engine = self
            .engine
            .unwrap_or_else(|| engine_for(&self.config, Arc::clone(&self.storage)));
        Server {
            config: self.config,
            storage: self.storage,
            engine,
        }
    }
}
