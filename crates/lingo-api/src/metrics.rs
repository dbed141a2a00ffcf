//! Metrics middleware and Prometheus export for the Lingo API.
//!
//! Request metrics are recorded here; engine metrics (`lingo_migrate_*`) are
//! recorded by `lingo-migrate` through the same global recorder.

use std::sync::OnceLock;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// API request duration histogram.
pub const API_REQUEST_DURATION: &str = "lingo_api_request_duration_seconds";

/// API request counter.
pub const API_REQUEST_TOTAL: &str = "lingo_api_request_total";

/// Rejected authentication counter.
pub const AUTH_REJECTIONS: &str = "lingo_api_auth_rejections_total";

const UNMATCHED_ENDPOINT: &str = "unmatched";

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initializes the global metrics recorder with Prometheus exporter.
///
/// Safe to call multiple times; subsequent calls are no-ops.
///
/// # Panics
///
/// Panics if the Prometheus recorder cannot be installed.
#[allow(clippy::panic)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .unwrap_or_else(|e| panic!("failed to install prometheus recorder: {e}"));

            describe_histogram!(API_REQUEST_DURATION, "Duration of API requests in seconds");
            describe_counter!(API_REQUEST_TOTAL, "Total number of API requests");
            describe_counter!(
                AUTH_REJECTIONS,
                "Total number of requests rejected by admin authentication"
            );
            lingo_migrate::metrics::register_metrics();

            tracing::info!("Prometheus metrics recorder initialized");
            handle
        })
        .clone()
}

/// Returns the global Prometheus handle, if initialized.
#[must_use]
pub fn prometheus_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

pub(crate) fn endpoint_label<B>(request: &Request<B>) -> String {
    request.extensions().get::<MatchedPath>().map_or_else(
        || UNMATCHED_ENDPOINT.to_string(),
        |path| path.as_str().to_string(),
    )
}

/// Middleware that records request metrics.
///
/// Captures:
/// - `lingo_api_request_duration_seconds{endpoint, method, status_class}`
/// - `lingo_api_request_total{endpoint, method, status_class}`
/// - `lingo_api_auth_rejections_total{endpoint}` for 401 responses
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let path = endpoint_label(&request);
    let method = request.method().to_string();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status_class = status_class(response.status());
    let labels = [
        ("endpoint", path.clone()),
        ("method", method.clone()),
        ("status_class", status_class.to_string()),
    ];

    histogram!(API_REQUEST_DURATION, &labels).record(duration);
    counter!(API_REQUEST_TOTAL, &labels).increment(1);
    if response.status() == StatusCode::UNAUTHORIZED {
        counter!(AUTH_REJECTIONS, "endpoint" => path.clone()).increment(1);
    }

    if duration > 1.0 {
        tracing::warn!(
            endpoint = %path,
            method = %method,
            status = response.status().as_u16(),
            duration_secs = %duration,
            "Slow request detected"
        );
    }

    response
}

/// Returns the status class (2xx, 3xx, 4xx, 5xx) for a status code.
fn status_class(status: StatusCode) -> &'static str {
    match status.as_u16() {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "unknown",
    }
}

/// Handler for the `/metrics` endpoint.
pub async fn serve_metrics() -> impl IntoResponse {
    prometheus_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain; charset=utf-8")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; charset=utf-8")],
                handle.render(),
            )
        },
    )
}
