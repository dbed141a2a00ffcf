//! Translation migration routes.
//!
//! Handlers validate input, check the record's current state and dispatch a
//! job. They never apply, roll back or scan storage themselves; the outcome
//! is observed by polling the record.
//!
//! ## Routes
//!
//! - `GET  /translation-migrations` - Paginated list, filterable by `interface` and `status`
//! - `GET  /translation-migrations/{id}` - One record
//! - `POST /translation-migrations/{id}/apply` - Queue an apply
//! - `POST /translation-migrations/{id}/rollback` - Queue a rollback
//! - `POST /translation-migrations/sync` - Queue discovery for one interface
//! - `GET  /translation-migrations/backups` - Backups of one `interface`, newest first

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use lingo_core::{InterfaceOrigin, MigrationId};
use lingo_migrate::applier::ApplyOptions;
use lingo_migrate::dispatch::EnqueueResult;
use lingo_migrate::error::Error as MigrateError;
use lingo_migrate::gateway::BackupEntry;
use lingo_migrate::ledger::{ListFilter, MAX_PER_PAGE};
use lingo_migrate::record::{MigrationRecord, MigrationStatus};

use crate::context::RequestContext;
use crate::error::{ApiError, ApiResult, ValidationErrors};
use crate::server::AppState;

/// Longest accepted rollback reason, in characters.
pub const MAX_REASON_CHARS: usize = 500;

/// Message returned when an apply is queued.
pub const APPLY_ACCEPTED: &str = "Migration is being processed";
/// Message returned when a rollback is queued.
pub const ROLLBACK_ACCEPTED: &str = "Rollback is being processed";
/// Message returned when a sync is queued.
pub const SYNC_ACCEPTED: &str = "Sync job has been queued";

/// Query parameters of the list endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    /// Interface filter.
    pub interface: Option<String>,
    /// Status filter.
    pub status: Option<String>,
    /// 1-based page.
    pub page: Option<String>,
    /// Page size.
    pub per_page: Option<String>,
}

/// Query parameters of the backup listing.
#[derive(Debug, Default, Deserialize)]
pub struct BackupParams {
    /// Interface whose backups to list.
    pub interface: Option<String>,
}

/// `{"data": ...}` envelope.
#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    /// Payload.
    pub data: T,
}

/// Pagination block of a list response.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct PageMeta {
    /// Page returned.
    pub current_page: u32,
    /// Position of the first item across all pages, if any.
    pub from: Option<usize>,
    /// Last page number.
    pub last_page: u32,
    /// Page size.
    pub per_page: u32,
    /// Position of the last item across all pages, if any.
    pub to: Option<usize>,
    /// Items across all pages.
    pub total: usize,
}

/// List response.
#[derive(Debug, Serialize)]
pub struct ListResponse {
    /// Records on this page, newest first.
    pub data: Vec<MigrationRecord>,
    /// Pagination.
    pub meta: PageMeta,
}

/// Body of an accepted apply or rollback.
#[derive(Debug, Serialize)]
pub struct MigrationAccepted {
    /// Human-readable status.
    pub message: &'static str,
    /// The record the job targets.
    pub migration_id: MigrationId,
}

/// Body of an accepted sync.
#[derive(Debug, Serialize)]
pub struct SyncAccepted {
    /// Human-readable status.
    pub message: &'static str,
    /// Interface being scanned.
    pub interface: InterfaceOrigin,
    /// Whether discovered bundles will be applied.
    pub auto_process: bool,
}

/// Creates translation migration routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/translation-migrations", get(list_migrations))
        .route("/translation-migrations/sync", post(sync_migrations))
        .route("/translation-migrations/backups", get(list_backups))
        .route("/translation-migrations/{id}", get(get_migration))
        .route("/translation-migrations/{id}/apply", post(apply_migration))
        .route(
            "/translation-migrations/{id}/rollback",
            post(rollback_migration),
        )
}

/// List migrations.
///
/// GET /api/v1/translation-migrations
pub(crate) async fn list_migrations(
    State(state): State<Arc<AppState>>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(params) = params.map_err(|e| ApiError::validation(e.body_text()))?;
    let filter = list_filter(&params)?;

    let page = state.engine.ledger().list(&filter).await?;
    let meta = page_meta(
        page.page,
        page.per_page,
        page.total,
        page.items.len(),
        page.last_page(),
    );
    Ok(Json(ListResponse {
        data: page.items,
        meta,
    }))
}

/// Get one migration.
///
/// GET /api/v1/translation-migrations/{id}
pub(crate) async fn get_migration(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let record = load(&state, &id).await?;
    Ok(Json(DataResponse { data: record }))
}

/// Queue an apply.
///
/// A `failed` record is queued as a reprocess: the job moves it back to
/// `pending` before applying, so a refused dispatch leaves it `failed`.
///
/// POST /api/v1/translation-migrations/{id}/apply
pub(crate) async fn apply_migration(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let body = json_object(&body)?;
    let mut errors = ValidationErrors::new();
    let create_backup = optional_bool(&body, "create_backup", &mut errors);
    let validate_checksum = optional_bool(&body, "validate_checksum", &mut errors);
    errors.into_result()?;

    let defaults = ApplyOptions::default();
    let options = ApplyOptions {
        create_backup: create_backup.unwrap_or(defaults.create_backup),
        validate_checksum: validate_checksum.unwrap_or(defaults.validate_checksum),
    };

    let record = load(&state, &id).await?;
    let dispatcher = state.engine.dispatcher();
    let result = match record.status {
        MigrationStatus::Pending => dispatcher.dispatch_apply(record.id, options).await?,
        MigrationStatus::Failed => dispatcher.dispatch_reprocess(record.id, options).await?,
        status => {
            return Err(ApiError::conflict(format!(
                "migration {} is {status} and cannot be applied",
                record.id
            )));
        }
    };
    log_dispatch(&ctx, "apply", record.id, &result);

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: MigrationAccepted {
                message: APPLY_ACCEPTED,
                migration_id: record.id,
            },
        }),
    ))
}

/// Queue a rollback.
///
/// The record's state is checked here so a rollback that can never succeed
/// is refused instead of queued.
///
/// POST /api/v1/translation-migrations/{id}/rollback
pub(crate) async fn rollback_migration(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let body = json_object(&body)?;
    let mut errors = ValidationErrors::new();
    let reason = required_reason(&body, &mut errors);
    errors.into_result()?;
    let reason = reason.unwrap_or_default();

    let record = load(&state, &id).await?;
    match record.status {
        MigrationStatus::Completed => {}
        MigrationStatus::RolledBack => {
            return Err(MigrateError::AlreadyRolledBack { id: record.id }.into());
        }
        status => return Err(MigrateError::InvalidStateForRollback { status }.into()),
    }
    if record.metadata.backup_path.is_none() {
        return Err(MigrateError::NoBackupAvailable { id: record.id }.into());
    }

    let result = state
        .engine
        .dispatcher()
        .dispatch_rollback(record.id, reason)
        .await?;
    log_dispatch(&ctx, "rollback", record.id, &result);

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: MigrationAccepted {
                message: ROLLBACK_ACCEPTED,
                migration_id: record.id,
            },
        }),
    ))
}

/// Queue discovery for one interface.
///
/// POST /api/v1/translation-migrations/sync
pub(crate) async fn sync_migrations(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let body = json_object(&body)?;
    let mut errors = ValidationErrors::new();
    let interface = required_interface(&body, &mut errors);
    let auto_process = optional_bool(&body, "auto_process", &mut errors).unwrap_or(false);
    errors.into_result()?;
    let Some(interface) = interface else {
        return Err(ApiError::validation("The interface field is required."));
    };

    let result = state
        .engine
        .dispatcher()
        .dispatch_sync(interface, auto_process)
        .await?;
    tracing::info!(
        request_id = %ctx.request_id,
        actor = ctx.actor,
        interface = %interface,
        auto_process,
        result = result.label(),
        "sync requested"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: SyncAccepted {
                message: SYNC_ACCEPTED,
                interface,
                auto_process,
            },
        }),
    ))
}

/// List backups of one interface.
///
/// GET /api/v1/translation-migrations/backups?interface=mobile
pub(crate) async fn list_backups(
    State(state): State<Arc<AppState>>,
    params: Result<Query<BackupParams>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(params) = params.map_err(|e| ApiError::validation(e.body_text()))?;
    let mut errors = ValidationErrors::new();
    let interface = match non_empty(params.interface.as_deref()) {
        None => {
            errors.add("interface", "The interface field is required.");
            None
        }
        Some(raw) => raw.parse::<InterfaceOrigin>().ok().or_else(|| {
            errors.add("interface", "The selected interface is invalid.");
            None
        }),
    };
    errors.into_result()?;
    let Some(interface) = interface else {
        return Err(ApiError::validation("The interface field is required."));
    };

    let backups: Vec<BackupEntry> = state.engine.gateway().list_backups(interface).await?;
    Ok(Json(DataResponse { data: backups }))
}

async fn load(state: &AppState, raw_id: &str) -> ApiResult<MigrationRecord> {
    let id = raw_id
        .parse::<u64>()
        .map(MigrationId::new)
        .map_err(|_| ApiError::not_found(format!("migration not found: {raw_id}")))?;
    state
        .engine
        .ledger()
        .get(id)
        .await?
        .ok_or_else(|| MigrateError::RecordNotFound { id }.into())
}

fn log_dispatch(ctx: &RequestContext, operation: &str, id: MigrationId, result: &EnqueueResult) {
    tracing::info!(
        request_id = %ctx.request_id,
        actor = ctx.actor,
        migration_id = %id,
        operation,
        result = result.label(),
        "migration job requested"
    );
}

fn list_filter(params: &ListParams) -> ApiResult<ListFilter> {
    let mut errors = ValidationErrors::new();
    let mut filter = ListFilter::default();

    if let Some(raw) = non_empty(params.interface.as_deref()) {
        match raw.parse::<InterfaceOrigin>() {
            Ok(interface) => filter.interface = Some(interface),
            Err(_) => errors.add("interface", "The selected interface is invalid."),
        }
    }
    if let Some(raw) = non_empty(params.status.as_deref()) {
        match raw.parse::<MigrationStatus>() {
            Ok(status) => filter.status = Some(status),
            Err(_) => errors.add("status", "The selected status is invalid."),
        }
    }
    if let Some(raw) = non_empty(params.page.as_deref()) {
        match raw.parse::<u32>() {
            Ok(page) if page >= 1 => filter.page = page,
            _ => errors.add("page", "The page field must be an integer of at least 1."),
        }
    }
    if let Some(raw) = non_empty(params.per_page.as_deref()) {
        match raw.parse::<u32>() {
            Ok(per_page) if (1..=MAX_PER_PAGE).contains(&per_page) => filter.per_page = per_page,
            _ => errors.add(
                "per_page",
                format!("The per_page field must be between 1 and {MAX_PER_PAGE}."),
            ),
        }
    }

    errors.into_result()?;
    Ok(filter)
}

fn page_meta(page: u32, per_page: u32, total: usize, count: usize, last_page: u32) -> PageMeta {
    let (from, to) = if count == 0 {
        (None, None)
    } else {
        let from = (page as usize - 1) * per_page as usize + 1;
        (Some(from), Some(from + count - 1))
    };
    PageMeta {
        current_page: page,
        from,
        last_page,
        per_page,
        to,
        total,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn json_object(body: &[u8]) -> ApiResult<Map<String, Value>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ApiError::validation("request body must be a JSON object")),
        Err(e) => Err(ApiError::validation(format!("request body is not valid JSON: {e}"))),
    }
}

fn optional_bool(
    body: &Map<String, Value>,
    field: &str,
    errors: &mut ValidationErrors,
) -> Option<bool> {
    match body.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::Bool(value)) => Some(*value),
        Some(_) => {
            errors.add(field, format!("The {field} field must be true or false."));
            None
        }
    }
}

fn required_reason(body: &Map<String, Value>, errors: &mut ValidationErrors) -> Option<String> {
    match body.get("reason") {
        None | Some(Value::Null) => {
            errors.add("reason", "The reason field is required.");
            None
        }
        Some(Value::String(reason)) => {
            let reason = reason.trim();
            if reason.is_empty() {
                errors.add("reason", "The reason field is required.");
                None
            } else if reason.chars().count() > MAX_REASON_CHARS {
                errors.add(
                    "reason",
                    format!(
                        "The reason field must not be greater than {MAX_REASON_CHARS} characters."
                    ),
                );
                None
            } else {
                Some(reason.to_string())
            }
        }
        Some(_) => {
            errors.add("reason", "The reason field must be a string.");
            None
        }
    }
}

fn required_interface(
    body: &Map<String, Value>,
    errors: &mut ValidationErrors,
) -> Option<InterfaceOrigin> {
    match body.get("interface") {
        None | Some(Value::Null) => {
            errors.add("interface", "The interface field is required.");
            None
        }
        Some(Value::String(raw)) => match raw.parse::<InterfaceOrigin>() {
            Ok(interface) => Some(interface),
            Err(_) => {
                errors.add("interface", "The selected interface is invalid.");
                None
            }
        },
        Some(_) => {
            errors.add("interface", "The selected interface is invalid.");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn empty_body_is_an_empty_object() {
        assert!(json_object(b"").unwrap().is_empty());
        assert!(json_object(b"  \n").unwrap().is_empty());
        assert!(json_object(b"[1]").is_err());
        assert!(json_object(b"{nope").is_err());
    }

    #[test]
    fn booleans_must_be_json_booleans() {
        let body = object(json!({"create_backup": "yes", "validate_checksum": false}));
        let mut errors = ValidationErrors::new();
        assert_eq!(optional_bool(&body, "create_backup", &mut errors), None);
        assert_eq!(optional_bool(&body, "validate_checksum", &mut errors), Some(false));
        assert_eq!(optional_bool(&body, "missing", &mut errors), None);
        assert_eq!(errors.fields().collect::<Vec<_>>(), vec!["create_backup"]);
    }

    #[test]
    fn reason_is_required_and_bounded() {
        let mut errors = ValidationErrors::new();
        assert_eq!(
            required_reason(&object(json!({"reason": "  bad data "})), &mut errors).as_deref(),
            Some("bad data")
        );
        assert!(errors.is_empty());

        for body in [json!({}), json!({"reason": "   "}), json!({"reason": 7})] {
            let mut errors = ValidationErrors::new();
            assert!(required_reason(&object(body), &mut errors).is_none());
            assert!(!errors.is_empty());
        }

        let mut errors = ValidationErrors::new();
        let long = "x".repeat(MAX_REASON_CHARS + 1);
        assert!(required_reason(&object(json!({ "reason": long })), &mut errors).is_none());
    }

    #[test]
    fn interface_must_be_known() {
        let mut errors = ValidationErrors::new();
        assert_eq!(
            required_interface(&object(json!({"interface": "web_financer"})), &mut errors),
            Some(InterfaceOrigin::WebFinancer)
        );
        let desktop = object(json!({"interface": "desktop"}));
        assert!(required_interface(&desktop, &mut errors).is_none());
        assert_eq!(errors.fields().collect::<Vec<_>>(), vec!["interface"]);
    }

    #[test]
    fn list_filter_parses_and_validates() {
        let filter = list_filter(&ListParams {
            interface: Some("mobile".into()),
            status: Some("completed".into()),
            page: Some("2".into()),
            per_page: Some("5".into()),
        })
        .unwrap();
        assert_eq!(filter.interface, Some(InterfaceOrigin::Mobile));
        assert_eq!(filter.status, Some(MigrationStatus::Completed));
        assert_eq!((filter.page, filter.per_page), (2, 5));

        let err = list_filter(&ListParams {
            status: Some("archived".into()),
            per_page: Some("1000".into()),
            ..ListParams::default()
        })
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.errors().fields().collect::<Vec<_>>(), vec!["per_page", "status"]);
    }

    #[test]
    fn page_meta_reports_positions() {
        assert_eq!(
            page_meta(2, 15, 31, 15, 3),
            PageMeta {
                current_page: 2,
                from: Some(16),
                last_page: 3,
                per_page: 15,
                to: Some(30),
                total: 31,
            }
        );
        let empty = page_meta(1, 15, 0, 0, 1);
        assert_eq!((empty.from, empty.to), (None, None));
    }
}
