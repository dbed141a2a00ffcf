//! Request context extraction and admin authentication middleware.
//!
//! Every migration route requires `Authorization: Bearer <LINGO_ADMIN_TOKEN>`.
//! In debug mode without a configured token, requests are accepted as the
//! `debug` actor for local development.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{FromRequestParts, State};
use axum::http::header::HeaderName;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use ulid::Ulid;

use crate::error::ApiError;
use crate::server::AppState;

/// Header name for request IDs.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Actor recorded for unauthenticated debug requests.
pub const DEBUG_ACTOR: &str = "debug";

/// Actor recorded for requests carrying the admin token.
pub const ADMIN_ACTOR: &str = "admin";

/// Per-request context derived from authentication and headers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Who made the request.
    pub actor: &'static str,
    /// Request ID for tracing/correlation.
    pub request_id: String,
}

impl FromRequestParts<Arc<AppState>> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(existing) = parts.extensions.get::<Self>() {
            return Ok(existing.clone());
        }

        let headers = &parts.headers;
        let request_id =
            request_id_from_headers(headers).unwrap_or_else(|| Ulid::new().to_string());

        let actor = match state.config.admin_token.as_ref() {
            Some(expected) => {
                let token = bearer_token(headers)
                    .ok_or_else(|| ApiError::missing_auth().with_request_id(request_id.clone()))?;
                if !tokens_match(&token, expected.expose()) {
                    tracing::warn!(
                        request_id = %request_id,
                        "rejected request with invalid admin token"
                    );
                    return Err(ApiError::invalid_token().with_request_id(request_id));
                }
                ADMIN_ACTOR
            }
            None if state.config.debug => DEBUG_ACTOR,
            None => {
                return Err(ApiError::unauthorized("admin token is not configured")
                    .with_request_id(request_id));
            }
        };

        let ctx = Self { actor, request_id };
        parts.extensions.insert(ctx.clone());
        Ok(ctx)
    }
}

fn request_id_from_headers(headers: &HeaderMap) -> Option<String> {
    header_string(headers, REQUEST_ID_HEADER).filter(|id| !id.is_empty())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = header_string(headers, "Authorization")?;
    let token = raw.strip_prefix("Bearer ")?;
    Some(token.trim().to_string())
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(name)?;
    header_value_to_string(value)
}

fn header_value_to_string(value: &HeaderValue) -> Option<String> {
    value.to_str().ok().map(str::to_string)
}

// Constant time for equal-length inputs.
fn tokens_match(presented: &str, expected: &str) -> bool {
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Authentication middleware.
///
/// Injects a verified [`RequestContext`] into request extensions and echoes
/// the request ID on the response.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let (mut parts, body) = req.into_parts();

    let ctx = match RequestContext::from_request_parts(&mut parts, &state).await {
        Ok(ctx) => ctx,
        Err(err) => return err.into_response(),
    };

    let mut req = Request::from_parts(parts, body);
    let request_id = ctx.request_id.clone();
    req.extensions_mut().insert(ctx);

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_match() {
        assert!(tokens_match("s3cret", "s3cret"));
        assert!(!tokens_match("s3cret", "s3creT"));
        assert!(!tokens_match("s3cret", "s3cret-longer"));
        assert!(!tokens_match("", "s3cret"));
    }

    #[test]
    fn test_bearer_token_requires_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_static("Basic abc"));
        assert!(bearer_token(&headers).is_none());

        headers.insert("Authorization", HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc"));
    }
}
