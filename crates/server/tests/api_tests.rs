//! Integration tests for the resolve, artifact, and operational endpoints.

mod common;

use axum::http::StatusCode;
use common::TestServer;
use marquee_core::EntityKind;
use serde_json::json;
use std::sync::atomic::Ordering;

#[tokio::test]
async fn test_resolve_fetches_from_upstream() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;
    server
        .upstream
        .insert(EntityKind::Series, 42, json!({ "id": 42, "name": "Deep Space" }));

    let (status, body) = server
        .request("GET", "/api/v1/series/42", None, Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["payload"]["name"], json!("Deep Space"));
    assert_eq!(body["stale"], json!(false));
}

#[tokio::test]
async fn test_resolve_second_hit_served_from_cache() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;
    server
        .upstream
        .insert(EntityKind::Movie, 7, json!({ "id": 7 }));

    for _ in 0..3 {
        let (status, _) = server
            .request("GET", "/api/v1/movie/7", None, Some(&token))
            .await;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(server.upstream.fetch_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_resolve_unknown_entity_is_not_found() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    let (status, body) = server
        .request("GET", "/api/v1/series/99999", None, Some(&token))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], json!("not_found"));
}

#[tokio::test]
async fn test_resolve_invalid_kind_is_validation_error() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    let (status, body) = server
        .request("GET", "/api/v1/starship/1", None, Some(&token))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], json!("validation"));
}

#[tokio::test]
async fn test_resolve_requires_auth() {
    let server = TestServer::new().await;
    let (status, body) = server.request("GET", "/api/v1/series/42", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], json!("missing_token"));
}

#[tokio::test]
async fn test_resolve_upstream_outage_without_cache() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;
    server.upstream.set_unavailable(true);

    let (status, body) = server
        .request("GET", "/api/v1/series/42", None, Some(&token))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], json!("upstream_unavailable"));
}

#[tokio::test]
async fn test_list_artifacts_for_cached_entity() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;
    server
        .upstream
        .insert(EntityKind::Series, 42, json!({ "id": 42 }));

    // Resolve first so the entity has a durable entry.
    let (status, _) = server
        .request("GET", "/api/v1/series/42", None, Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = server
        .request("GET", "/api/v1/series/42/artifacts", None, Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entity_kind"], json!("series"));
    assert_eq!(body["entity_id"], json!(42));
    assert_eq!(body["variants"], json!([]));
}

#[tokio::test]
async fn test_list_artifacts_unknown_entity_is_not_found() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    let (status, body) = server
        .request("GET", "/api/v1/series/42/artifacts", None, Some(&token))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], json!("not_found"));
}

#[tokio::test]
async fn test_healthz_is_open() {
    let server = TestServer::new().await;
    let (status, body) = server.request("GET", "/healthz", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));
}

#[tokio::test]
async fn test_readyz_checks_backends() {
    let server = TestServer::new().await;
    let (status, body) = server.request("GET", "/readyz", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));
}

#[tokio::test]
async fn test_metrics_route_follows_config() {
    let server = TestServer::new().await;
    let (status, _, _) = server.request_raw("GET", "/metrics", None, None).await;
    assert_eq!(status, StatusCode::OK);

    let disabled = TestServer::with_config(|config| {
        config.server.metrics_enabled = false;
    })
    .await;
    let (status, _, _) = disabled.request_raw("GET", "/metrics", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
