//! HTTP route handlers.

pub mod migrations;

use std::sync::Arc;

use axum::Router;

use crate::server::AppState;

/// `/api/v1` routes (admin-authenticated).
pub fn api_v1_routes() -> Router<Arc<AppState>> {
    Router::new().merge(migrations::routes())
}
