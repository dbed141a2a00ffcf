//! # lingo-api
//!
//! HTTP composition layer for the Lingo translation migration engine.
//!
//! This crate provides the admin surface over `lingo-migrate`:
//!
//! - **Authentication**: bearer admin token on every migration route
//! - **Routing**: list, inspect, apply, roll back and sync migrations
//! - **Service wiring**: engine assembly, the in-process worker pool and
//!   reconciliation on boot
//! - **Observability**: request metrics, Prometheus export and health checks
//!
//! ## Design Principles
//!
//! This crate is a **thin composition layer** with no domain policy.
//! Every state decision lives in `lingo-migrate`; handlers validate input,
//! dispatch a job and answer `202 Accepted`.
//!
//! ## Endpoints
//!
//! ```text
//! GET  /health                                       - Liveness
//! GET  /ready                                        - Storage reachability
//! GET  /metrics                                      - Prometheus metrics
//! GET  /api/v1/translation-migrations                - Paginated list
//! GET  /api/v1/translation-migrations/{id}           - One record
//! POST /api/v1/translation-migrations/{id}/apply     - Queue an apply
//! POST /api/v1/translation-migrations/{id}/rollback  - Queue a rollback
//! POST /api/v1/translation-migrations/sync           - Queue discovery
//! GET  /api/v1/translation-migrations/backups        - Backups of one interface
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use lingo_api::server::Server;
//!
//! let server = Server::builder()
//!     .http_port(8080)
//!     .debug(true)
//!     .build();
//!
//! server.serve().await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod routes;
pub mod server;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::context::RequestContext;
    pub use crate::error::{ApiError, ApiResult};
    pub use crate::server::Server;
}
