//! API integration tests.
//!
//! Tests the complete request flow: HTTP → routes → dispatcher → worker → ledger.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use lingo_api::server::ServerBuilder;
use lingo_core::InterfaceOrigin;
use lingo_migrate::record::MigrationStatus;
use lingo_test_utils::{
    InjectedFailure, TestContext, assert_completed_with_backup, assert_status, sample_bundle,
};

const BASE: &str = "/api/v1/translation-migrations";
const BODY: &str = r#"{"greeting":"Hello","farewell":"Bye"}"#;
const ADMIN_TOKEN: &str = "test-admin-token";

fn router(ctx: &TestContext) -> axum::Router {
    ServerBuilder::new()
        .debug(true)
        .engine(ctx.engine.clone())
        .storage_backend(ctx.storage.clone())
        .build()
        .test_router()
}

fn router_with_token(ctx: &TestContext) -> axum::Router {
    ServerBuilder::new()
        .admin_token(ADMIN_TOKEN)
        .engine(ctx.engine.clone())
        .storage_backend(ctx.storage.clone())
        .build()
        .test_router()
}

mod helpers {
    use super::*;

    pub fn make_request(method: Method, uri: &str, body: Option<Value>) -> Result<Request<Body>> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");

        let body = match body {
            Some(v) => Body::from(serde_json::to_vec(&v).context("serialize request body")?),
            None => Body::empty(),
        };

        builder.body(body).context("build request")
    }

    pub async fn send(
        router: axum::Router,
        request: Request<Body>,
    ) -> Result<(StatusCode, axum::http::HeaderMap, Value)> {
        let response = router.oneshot(request).await.map_err(|err| match err {})?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), 256 * 1024)
            .await
            .context("read response body")?;
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).with_context(|| {
                format!(
                    "parse JSON response (status={status}): {}",
                    String::from_utf8_lossy(&body)
                )
            })?
        };
        Ok((status, headers, json))
    }

    pub async fn get_json(router: axum::Router, uri: &str) -> Result<(StatusCode, Value)> {
        let (status, _, json) = send(router, make_request(Method::GET, uri, None)?).await?;
        Ok((status, json))
    }

    pub async fn post_json(
        router: axum::Router,
        uri: &str,
        body: Value,
    ) -> Result<(StatusCode, Value)> {
        let (status, _, json) = send(router, make_request(Method::POST, uri, Some(body))?).await?;
        Ok((status, json))
    }

    pub fn error_fields(body: &Value) -> Vec<String> {
        body["errors"]
            .as_object()
            .map(|errors| errors.keys().cloned().collect())
            .unwrap_or_default()
    }
}

use helpers::{error_fields, get_json, post_json};

#[tokio::test]
async fn list_returns_records_newest_first_with_meta() -> Result<()> {
    let ctx = TestContext::new();
    ctx.seed_pending(InterfaceOrigin::Mobile, "mobile_a.json", BODY).await;
    ctx.seed_pending(InterfaceOrigin::Mobile, "mobile_b.json", BODY).await;
    ctx.seed_pending(InterfaceOrigin::WebFinancer, "web_a.json", BODY).await;

    let (status, body) = get_json(router(&ctx), BASE).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(3));
    assert_eq!(body["data"][0]["filename"], "web_a.json");
    assert_eq!(body["meta"]["total"], 3);
    assert_eq!(body["meta"]["current_page"], 1);
    assert_eq!(body["meta"]["from"], 1);
    assert_eq!(body["meta"]["to"], 3);

    let (status, body) = get_json(
        router(&ctx),
        &format!("{BASE}?interface=mobile&status=pending&per_page=1&page=2"),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["data"][0]["interface_origin"], "mobile");
    assert_eq!(body["meta"]["total"], 2);
    assert_eq!(body["meta"]["last_page"], 2);
    assert_eq!(body["meta"]["per_page"], 1);
    assert_eq!(body["meta"]["from"], 2);
    Ok(())
}

#[tokio::test]
async fn list_rejects_unknown_filters() -> Result<()> {
    let ctx = TestContext::new();

    let (status, body) = get_json(
        router(&ctx),
        &format!("{BASE}?interface=desktop&status=archived&per_page=0"),
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_FAILED");
    assert_eq!(error_fields(&body), vec!["interface", "per_page", "status"]);
    Ok(())
}

#[tokio::test]
async fn get_returns_one_record_or_404() -> Result<()> {
    let ctx = TestContext::new();
    let record = ctx
        .seed_pending(InterfaceOrigin::WebBeneficiary, "beneficiary.json", BODY)
        .await;

    let (status, body) = get_json(router(&ctx), &format!("{BASE}/{}", record.id)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], record.id.get());
    assert_eq!(body["data"]["status"], "pending");
    assert_eq!(body["data"]["interface_origin"], "web_beneficiary");
    assert_eq!(body["data"]["checksum"], record.checksum.as_str());

    let (status, body) = get_json(router(&ctx), &format!("{BASE}/9999")).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let (status, _) = get_json(router(&ctx), &format!("{BASE}/not-a-number")).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn apply_queues_a_job_that_completes_the_record() -> Result<()> {
    let ctx = TestContext::new();
    let record = ctx
        .seed_pending(InterfaceOrigin::Mobile, "mobile_2025.json", &sample_bundle(3))
        .await;

    let (status, body) =
        post_json(router(&ctx), &format!("{BASE}/{}/apply", record.id), json!({})).await?;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["message"], "Migration is being processed");
    assert_eq!(body["data"]["migration_id"], record.id.get());

    assert_status(&ctx.record(record.id).await, MigrationStatus::Pending);
    assert_eq!(ctx.drain().await, 1);

    let record = ctx.record(record.id).await;
    assert_completed_with_backup(&record, &ctx.storage);
    assert_eq!(ctx.content.apply_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn apply_twice_before_processing_runs_once() -> Result<()> {
    let ctx = TestContext::new();
    let record = ctx.seed_pending(InterfaceOrigin::Mobile, "dup.json", BODY).await;
    let uri = format!("{BASE}/{}/apply", record.id);

    let (first, _) = post_json(router(&ctx), &uri, json!({})).await?;
    let (second, _) = post_json(router(&ctx), &uri, json!({})).await?;
    assert_eq!((first, second), (StatusCode::ACCEPTED, StatusCode::ACCEPTED));

    ctx.drain().await;
    assert_eq!(ctx.content.apply_calls(), 1);
    assert_status(&ctx.record(record.id).await, MigrationStatus::Completed);
    Ok(())
}

#[tokio::test]
async fn apply_on_failed_record_reprocesses_it() -> Result<()> {
    let ctx = TestContext::new();
    ctx.content.fail_apply_times(InjectedFailure::Reject, 1);
    let record = ctx.seed_pending(InterfaceOrigin::WebFinancer, "retry.json", BODY).await;
    let uri = format!("{BASE}/{}/apply", record.id);

    post_json(router(&ctx), &uri, json!({})).await?;
    ctx.drain().await;
    assert_status(&ctx.record(record.id).await, MigrationStatus::Failed);

    let (status, _) = post_json(router(&ctx), &uri, json!({})).await?;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_status(&ctx.record(record.id).await, MigrationStatus::Failed);

    ctx.drain().await;
    let record = ctx.record(record.id).await;
    assert_completed_with_backup(&record, &ctx.storage);
    assert!(record.metadata.reprocess_requested_at.is_some());
    assert_eq!(record.metadata.reprocess_count, Some(1));
    Ok(())
}

#[tokio::test]
async fn refused_reprocess_leaves_record_failed() -> Result<()> {
    let ctx = TestContext::builder().queue_capacity(1).build();
    ctx.content.fail_apply_times(InjectedFailure::Reject, 1);
    let failed = ctx.seed_pending(InterfaceOrigin::Mobile, "a.json", BODY).await;
    let blocker = ctx.seed_pending(InterfaceOrigin::Mobile, "b.json", BODY).await;
    post_json(router(&ctx), &format!("{BASE}/{}/apply", failed.id), json!({})).await?;
    ctx.drain().await;
    assert_status(&ctx.record(failed.id).await, MigrationStatus::Failed);

    let (status, _) =
        post_json(router(&ctx), &format!("{BASE}/{}/apply", blocker.id), json!({})).await?;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (status, _) =
        post_json(router(&ctx), &format!("{BASE}/{}/apply", failed.id), json!({})).await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let record = ctx.record(failed.id).await;
    assert_status(&record, MigrationStatus::Failed);
    assert!(record.metadata.reprocess_requested_at.is_none());
    Ok(())
}

#[tokio::test]
async fn apply_validates_boolean_options() -> Result<()> {
    let ctx = TestContext::new();
    let record = ctx.seed_pending(InterfaceOrigin::Mobile, "opts.json", BODY).await;

    let (status, body) = post_json(
        router(&ctx),
        &format!("{BASE}/{}/apply", record.id),
        json!({"create_backup": "yes", "validate_checksum": 1}),
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_fields(&body), vec!["create_backup", "validate_checksum"]);
    assert_eq!(ctx.drain().await, 0);
    Ok(())
}

#[tokio::test]
async fn apply_on_completed_record_conflicts() -> Result<()> {
    let ctx = TestContext::new();
    let record = ctx.seed_completed(InterfaceOrigin::Mobile, "done.json", BODY).await;

    let (status, body) =
        post_json(router(&ctx), &format!("{BASE}/{}/apply", record.id), json!({})).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
    assert_eq!(ctx.drain().await, 0);
    Ok(())
}

#[tokio::test]
async fn rollback_restores_a_completed_record() -> Result<()> {
    let ctx = TestContext::new();
    let record = ctx.seed_completed(InterfaceOrigin::Mobile, "live.json", BODY).await;
    let uri = format!("{BASE}/{}/rollback", record.id);

    let (status, body) =
        post_json(router(&ctx), &uri, json!({"reason": "  wrong wording  "})).await?;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["message"], "Rollback is being processed");
    assert_eq!(body["data"]["migration_id"], record.id.get());

    ctx.drain().await;
    let record = ctx.record(record.id).await;
    assert_status(&record, MigrationStatus::RolledBack);
    assert_eq!(record.metadata.rollback_reason.as_deref(), Some("wrong wording"));
    assert_eq!(ctx.content.restore_calls(), 1);

    let (status, _) = post_json(router(&ctx), &uri, json!({"reason": "again"})).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn rollback_requires_a_reason() -> Result<()> {
    let ctx = TestContext::new();
    let record = ctx.seed_completed(InterfaceOrigin::Mobile, "reason.json", BODY).await;
    let uri = format!("{BASE}/{}/rollback", record.id);

    for body in [json!({}), json!({"reason": "   "}), json!({"reason": "x".repeat(501)})] {
        let (status, response) = post_json(router(&ctx), &uri, body).await?;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(error_fields(&response), vec!["reason"]);
    }
    assert_eq!(ctx.drain().await, 0);
    Ok(())
}

#[tokio::test]
async fn rollback_refuses_records_that_cannot_roll_back() -> Result<()> {
    let ctx = TestContext::new();
    let pending = ctx.seed_pending(InterfaceOrigin::Mobile, "pending.json", BODY).await;
    let (status, _) = post_json(
        router(&ctx),
        &format!("{BASE}/{}/rollback", pending.id),
        json!({"reason": "nope"}),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let unbacked = ctx.seed_pending(InterfaceOrigin::Mobile, "unbacked.json", BODY).await;
    post_json(
        router(&ctx),
        &format!("{BASE}/{}/apply", unbacked.id),
        json!({"create_backup": false}),
    )
    .await?;
    ctx.drain().await;
    let unbacked = ctx.record(unbacked.id).await;
    assert_status(&unbacked, MigrationStatus::Completed);
    assert!(unbacked.metadata.backup_path.is_none());

    let (status, body) = post_json(
        router(&ctx),
        &format!("{BASE}/{}/rollback", unbacked.id),
        json!({"reason": "nope"}),
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "NO_BACKUP_AVAILABLE");
    assert_eq!(ctx.drain().await, 0);
    Ok(())
}

#[tokio::test]
async fn backups_are_listed_per_interface() -> Result<()> {
    let ctx = TestContext::new();
    let record = ctx.seed_completed(InterfaceOrigin::Mobile, "backed.json", BODY).await;
    let backup_path = record.metadata.backup_path.clone().expect("backup written");

    let (status, body) = get_json(router(&ctx), &format!("{BASE}/backups?interface=mobile")).await?;
    assert_eq!(status, StatusCode::OK);
    let backups = body["data"].as_array().expect("data array");
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0]["path"], backup_path.as_str());

    let (status, body) =
        get_json(router(&ctx), &format!("{BASE}/backups?interface=web_financer")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));

    for uri in [format!("{BASE}/backups"), format!("{BASE}/backups?interface=desktop")] {
        let (status, body) = get_json(router(&ctx), &uri).await?;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(error_fields(&body), vec!["interface"]);
    }
    Ok(())
}

#[tokio::test]
async fn sync_queues_discovery_for_one_interface() -> Result<()> {
    let ctx = TestContext::new();
    ctx.put_bundle(InterfaceOrigin::WebFinancer, "web_financer_new.json", BODY)
        .await;
    ctx.put_bundle(InterfaceOrigin::Mobile, "mobile_untouched.json", BODY)
        .await;

    let (status, body) =
        post_json(router(&ctx), &format!("{BASE}/sync"), json!({"interface": "web_financer"}))
            .await?;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["message"], "Sync job has been queued");
    assert_eq!(body["data"]["interface"], "web_financer");
    assert_eq!(body["data"]["auto_process"], false);

    ctx.drain().await;
    let (_, body) = get_json(router(&ctx), BASE).await?;
    assert_eq!(body["meta"]["total"], 1);
    assert_eq!(body["data"][0]["filename"], "web_financer_new.json");
    assert_eq!(body["data"][0]["status"], "pending");
    assert_eq!(ctx.content.apply_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn sync_validates_its_body() -> Result<()> {
    let ctx = TestContext::new();

    let (status, body) = post_json(
        router(&ctx),
        &format!("{BASE}/sync"),
        json!({"interface": "desktop", "auto_process": "sure"}),
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_fields(&body), vec!["auto_process", "interface"]);

    let (status, body) = post_json(router(&ctx), &format!("{BASE}/sync"), json!({})).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_fields(&body), vec!["interface"]);
    assert_eq!(ctx.drain().await, 0);
    Ok(())
}

#[tokio::test]
async fn admin_token_is_enforced() -> Result<()> {
    let ctx = TestContext::new();

    let (status, body) = get_json(router_with_token(&ctx), BASE).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "MISSING_AUTH");

    let request = Request::builder()
        .uri(BASE)
        .header(header::AUTHORIZATION, "Bearer wrong")
        .body(Body::empty())?;
    let (status, _, body) = helpers::send(router_with_token(&ctx), request).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "INVALID_TOKEN");

    let request = Request::builder()
        .uri(BASE)
        .header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"))
        .body(Body::empty())?;
    let (status, _, _) = helpers::send(router_with_token(&ctx), request).await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn health_needs_no_token() -> Result<()> {
    let ctx = TestContext::new();
    let (status, body) = get_json(router_with_token(&ctx), "/health").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn request_id_is_echoed() -> Result<()> {
    let ctx = TestContext::new();

    let request = Request::builder()
        .uri(BASE)
        .header("x-request-id", "req-42")
        .body(Body::empty())?;
    let (status, headers, _) = helpers::send(router(&ctx), request).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("x-request-id").and_then(|v| v.to_str().ok()), Some("req-42"));

    let request = Request::builder()
        .uri(BASE)
        .header("x-request-id", "req-43")
        .body(Body::empty())?;
    let (status, headers, body) = helpers::send(router_with_token(&ctx), request).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(headers.get("x-request-id").and_then(|v| v.to_str().ok()), Some("req-43"));
    assert_eq!(body["requestId"], "req-43");
    Ok(())
}
