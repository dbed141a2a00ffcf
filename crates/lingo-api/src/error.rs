//! API error types and HTTP response mapping.

use std::collections::BTreeMap;

use axum::Json;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header::HeaderName;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use lingo_core::Error as CoreError;
use lingo_migrate::error::Error as MigrateError;

use crate::context::REQUEST_ID_HEADER;

/// Seconds a client should wait before retrying a refused dispatch.
pub const QUEUE_FULL_RETRY_AFTER_SECS: u64 = 60;

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Standard JSON error response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message (safe for clients).
    pub message: String,
    /// Optional error category (e.g., `unprocessable_entity`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Optional request ID for correlation.
    pub request_id: Option<String>,
    /// Per-field validation messages.
    #[serde(skip_serializing_if = "ValidationErrors::is_empty")]
    pub errors: ValidationErrors,
}

/// Per-field validation messages, serialized as `{"field": ["message"]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a message against `field`.
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    /// Returns true if no field failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the failing field names in order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Returns `Ok` if no field failed, otherwise a 422 carrying the messages.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::invalid_fields`] when any message was recorded.
    pub fn into_result(self) -> ApiResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ApiError::invalid_fields(self))
        }
    }
}

/// HTTP API error with stable machine-readable code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    error: Option<&'static str>,
    request_id: Option<String>,
    retry_after_secs: Option<u64>,
    errors: ValidationErrors,
}

impl ApiError {
    /// Returns an error response for authentication failures.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    /// Returns an error response when the Authorization header is missing.
    #[must_use]
    pub fn missing_auth() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "MISSING_AUTH",
            "Authorization header required",
        )
    }

    /// Returns an error response when the bearer token is invalid.
    #[must_use]
    pub fn invalid_token() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "INVALID_TOKEN",
            "Invalid bearer token",
        )
    }

    /// Returns an error response for missing resources.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// Returns an error response for requests that conflict with a record's status.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    /// Returns an internal error response.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }

    /// Returns a 503 for work the server cannot accept right now.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", message)
    }

    /// Returns an unprocessable entity error response.
    pub fn unprocessable_entity(code: &'static str, message: impl Into<String>) -> Self {
        Self::new_with_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            code,
            message,
            Some("unprocessable_entity"),
        )
    }

    /// Returns a 422 for a request body or query that failed validation.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::unprocessable_entity("VALIDATION_FAILED", message)
    }

    /// Returns a 422 listing every field that failed validation.
    #[must_use]
    pub fn invalid_fields(errors: ValidationErrors) -> Self {
        let mut error = Self::validation("The given data was invalid.");
        error.errors = errors;
        error
    }

    /// Returns the per-field validation messages.
    #[must_use]
    pub const fn errors(&self) -> &ValidationErrors {
        &self.errors
    }

    /// Attaches a request ID for correlation.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Attaches a Retry-After header value in seconds.
    #[must_use]
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_secs = Some(seconds);
        self
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the human-readable error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the request ID, if one was attached.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Returns the stable machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self::new_with_error(status, code, message, None)
    }

    fn new_with_error(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
        error: Option<&'static str>,
    ) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            error,
            request_id: None,
            retry_after_secs: None,
            errors: ValidationErrors::new(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = self.request_id;
        let retry_after_secs = self.retry_after_secs;
        let mut response = (
            self.status,
            Json(ApiErrorBody {
                code: self.code.to_string(),
                message: self.message,
                error: self.error.map(str::to_string),
                request_id: request_id.clone(),
                errors: self.errors,
            }),
        )
            .into_response();

        if let Some(request_id) = request_id {
            if let Ok(value) = HeaderValue::from_str(&request_id) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
            }
        }

        if let Some(secs) = retry_after_secs {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static("retry-after"), value);
            }
        }

        response
    }
}

impl From<MigrateError> for ApiError {
    fn from(value: MigrateError) -> Self {
        match value {
            MigrateError::RecordNotFound { id } => {
                Self::not_found(format!("migration not found: {id}"))
            }
            err @ (MigrateError::InvalidTransition { .. }
            | MigrateError::InvalidStateForRollback { .. }
            | MigrateError::AlreadyRolledBack { .. }
            | MigrateError::DuplicateRecord { .. }
            | MigrateError::MigrationBusy { .. }) => Self::conflict(err.to_string()),
            err @ MigrateError::NoBackupAvailable { .. } => {
                Self::unprocessable_entity("NO_BACKUP_AVAILABLE", err.to_string())
            }
            err @ MigrateError::QueueFull { .. } => {
                tracing::warn!(error = %err, "dispatch refused");
                Self::service_unavailable(err.to_string())
                    .with_retry_after(QUEUE_FULL_RETRY_AFTER_SECS)
            }
            MigrateError::Core(inner) => inner.into(),
            err => {
                tracing::error!(error = %err, label = err.label(), "migration request failed");
                Self::internal("internal error")
            }
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::InvalidId { message } | CoreError::InvalidInput(message) => {
                Self::validation(message)
            }
            CoreError::NotFound(message) => Self::not_found(message),
            CoreError::ResourceNotFound { resource_type, id } => {
                Self::not_found(format!("{resource_type} not found: {id}"))
            }
            CoreError::PreconditionFailed { message } => Self::conflict(message),
            err @ (CoreError::Storage { .. }
            | CoreError::Serialization { .. }
            | CoreError::Internal { .. }) => {
                tracing::error!(error = %err, "core operation failed");
                Self::internal("internal error")
            }
        }
    }
}
