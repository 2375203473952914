mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use bytes::Bytes;
use common::{sample_tree, test_config, MockConnector};
use drive_gateway::models::user::UserRecord;
use drive_gateway::provider::UpstreamError;
use drive_gateway::routes::build_router;
use drive_gateway::services::identity::{IdentityBackend, IdentityStore};
use drive_gateway::state::AppState;
use http::header;
use http::Request;
use http::StatusCode;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

fn setup() -> (AppState, Arc<MockConnector>) {
    let connector = MockConnector::mirrored(sample_tree());
    let state = AppState::new(
        test_config(),
        connector.clone(),
        IdentityStore::in_memory(),
        None,
    );
    (state, connector)
}

async fn body_to_bytes(body: Body) -> Bytes {
    body.collect().await.unwrap().to_bytes()
}

async fn body_to_json(body: Body) -> Value {
    let bytes = body_to_bytes(body).await;
    serde_json::from_slice(&bytes).unwrap()
}

async fn get(state: &AppState, uri: &str, api_key: Option<&str>) -> axum::response::Response {
    let app = build_router(state.clone());
    let mut req = Request::builder().uri(uri);
    if let Some(key) = api_key {
        req = req.header("X-API-Key", key);
    }
    app.oneshot(req.body(Body::empty()).unwrap()).await.unwrap()
}

async fn post_json(
    state: &AppState,
    uri: &str,
    api_key: Option<&str>,
    body: Value,
) -> axum::response::Response {
    let app = build_router(state.clone());
    let mut req = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(key) = api_key {
        req = req.header("X-API-Key", key);
    }
    app.oneshot(req.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap()
}

// Helper: issue a key and return it
async fn create_test_key(state: &AppState, email: &str) -> String {
    let resp = post_json(state, "/identity/keys", None, json!({ "email": email })).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = body_to_json(resp.into_body()).await;
    body["data"]["apiKey"].as_str().unwrap().to_string()
}

// Helper: issue a key with provider tokens attached
async fn create_private_key(state: &AppState) -> String {
    let key = create_test_key(state, "private@example.com").await;
    let resp = post_json(
        state,
        "/identity/tokens",
        Some(&key),
        json!({ "accessToken": "access", "refreshToken": "refresh" }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    key
}

// ==================== Health Tests ====================

#[tokio::test]
async fn test_health_returns_200() {
    let (state, _) = setup();
    let resp = get(&state, "/health", None).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_to_json(resp.into_body()).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_status_reports_cache_and_backend() {
    let (state, _) = setup();
    let resp = get(&state, "/status", None).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_to_json(resp.into_body()).await;
    assert_eq!(body["data"]["cache_entries"], 0);
    assert_eq!(body["data"]["durable_identity_backend"], false);
    assert!(body["data"]["version"].is_string());
}

// ==================== Identity Tests ====================

#[tokio::test]
async fn test_create_key_returns_201() {
    let (state, _) = setup();
    let resp = post_json(&state, "/identity/keys", None, json!({ "email": "x@y.com" })).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let body = body_to_json(resp.into_body()).await;
    assert_eq!(body["data"]["email"], "x@y.com");
    assert_eq!(body["data"]["apiKey"].as_str().unwrap().len(), 64);
    assert!(body["data"]["createdAt"].is_string());
    assert_eq!(body["data"]["storage"], "fallback");
    assert!(body["error"].is_null());
}

#[tokio::test]
async fn test_create_key_twice_gives_distinct_keys() {
    let (state, _) = setup();
    let a = create_test_key(&state, "a@b.com").await;
    let b = create_test_key(&state, "a@b.com").await;
    assert_ne!(a, b);
}

#[tokio::test]
async fn test_create_key_without_email_returns_400() {
    let (state, _) = setup();
    let resp = post_json(&state, "/identity/keys", None, json!({})).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body = body_to_json(resp.into_body()).await;
    assert_eq!(body["error"]["code"], 400);
}

#[tokio::test]
async fn test_create_key_with_malformed_body_returns_400() {
    let (state, _) = setup();
    let app = build_router(state);
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/identity/keys")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{\"email\": "))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body = body_to_json(resp.into_body()).await;
    assert!(body["data"].is_null());
    assert_eq!(body["error"]["code"], 400);
    assert!(body["error"]["message"].is_string());
}

#[tokio::test]
async fn test_add_tokens_without_json_content_type_returns_400() {
    let (state, _) = setup();
    let key = create_test_key(&state, "x@y.com").await;
    let app = build_router(state);
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/identity/tokens")
                .header("X-API-Key", key.as_str())
                .body(Body::from("accessToken=a&refreshToken=r"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body = body_to_json(resp.into_body()).await;
    assert_eq!(body["error"]["code"], 400);
}

#[tokio::test]
async fn test_add_tokens_returns_user() {
    let (state, _) = setup();
    let key = create_test_key(&state, "x@y.com").await;

    let resp = post_json(
        &state,
        "/identity/tokens",
        Some(&key),
        json!({ "accessToken": "access", "refreshToken": "refresh" }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_to_json(resp.into_body()).await;
    assert_eq!(body["data"]["message"], "Provider tokens added");
    assert_eq!(body["data"]["user"]["email"], "x@y.com");
    assert!(body["data"]["user"]["id"].is_string());
}

#[tokio::test]
async fn test_add_empty_tokens_returns_400() {
    let (state, _) = setup();
    let key = create_test_key(&state, "x@y.com").await;

    let resp = post_json(
        &state,
        "/identity/tokens",
        Some(&key),
        json!({ "accessToken": "", "refreshToken": "" }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ==================== Gateway Tests ====================

#[tokio::test]
async fn test_tokens_without_key_returns_401() {
    let (state, _) = setup();
    let resp = post_json(
        &state,
        "/identity/tokens",
        None,
        json!({ "accessToken": "a", "refreshToken": "r" }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let body = body_to_json(resp.into_body()).await;
    assert!(body["error"].is_object());
    assert_eq!(body["error"]["code"], 401);
}

#[tokio::test]
async fn test_tokens_with_unknown_key_returns_403() {
    let (state, _) = setup();
    let resp = post_json(
        &state,
        "/identity/tokens",
        Some("not-a-key"),
        json!({ "accessToken": "a", "refreshToken": "r" }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_key_accepted_from_query_parameter() {
    let (state, _) = setup();
    let key = create_private_key(&state).await;

    let resp = get(
        &state,
        &format!("/access/private/detail/f1?api_key={}", key),
        None,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["x-access-mode"], "private");
}

/// Backend whose reads never finish in time.
struct StalledBackend;

#[async_trait]
impl IdentityBackend for StalledBackend {
    async fn insert(&self, _user: &UserRecord) -> anyhow::Result<()> {
        Ok(())
    }

    async fn find_by_api_key(&self, _api_key: &str) -> anyhow::Result<Option<UserRecord>> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(None)
    }

    async fn update(&self, _user: &UserRecord) -> anyhow::Result<()> {
        Ok(())
    }

    async fn touch(&self, _api_key: &str, _at: chrono::DateTime<chrono::Utc>) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_identity_lookup_timeout_returns_504() {
    let connector = MockConnector::mirrored(sample_tree());
    let identity = IdentityStore::new(Some(Arc::new(StalledBackend) as Arc<dyn IdentityBackend>));
    let state = AppState::new(test_config(), connector, identity, None);

    let resp = post_json(
        &state,
        "/identity/tokens",
        Some("slow-key"),
        json!({ "accessToken": "a", "refreshToken": "r" }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);

    let body = body_to_json(resp.into_body()).await;
    assert_eq!(body["error"]["code"], 504);
}

// ==================== Access Tests ====================

#[tokio::test]
async fn test_public_listing_without_key() {
    let (state, _) = setup();
    let resp = get(&state, "/access/public/listing/c", None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["x-access-mode"], "public");

    let body = body_to_json(resp.into_body()).await;
    let files = body["data"]["files"].as_array().unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0]["name"], "alpha.txt");
    assert_eq!(files[0]["mimeType"], "text/plain");
    assert_eq!(body["data"]["nextCursor"], "2");
}

#[tokio::test]
async fn test_listing_follows_cursor_and_search() {
    let (state, _) = setup();

    let resp = get(&state, "/access/public/listing/c?cursor=2", None).await;
    let body = body_to_json(resp.into_body()).await;
    assert_eq!(body["data"]["files"].as_array().unwrap().len(), 1);
    assert!(body["data"].get("nextCursor").is_none());

    let resp = get(&state, "/access/public/listing/c?search=beta", None).await;
    let body = body_to_json(resp.into_body()).await;
    assert_eq!(body["data"]["files"][0]["id"], "f2");
}

#[tokio::test]
async fn test_public_listing_with_unknown_key_returns_403() {
    let (state, _) = setup();
    let resp = get(&state, "/access/public/listing/c", Some("bogus")).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_private_listing_without_key_returns_401() {
    let (state, _) = setup();
    let resp = get(&state, "/access/private/listing/c", None).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_private_listing_without_provider_tokens_returns_403() {
    let (state, connector) = setup();
    let key = create_test_key(&state, "x@y.com").await;

    let resp = get(&state, "/access/private/listing/c", Some(&key)).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(connector.private.calls(), 0);
}

#[tokio::test]
async fn test_private_listing_uses_private_client() {
    let (state, connector) = setup();
    let key = create_private_key(&state).await;

    let resp = get(&state, "/access/private/listing/c", Some(&key)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["x-access-mode"], "private");
    assert!(resp.headers().get("x-access-fallback").is_none());
    assert_eq!(connector.private.calls(), 1);
    assert_eq!(connector.public.calls(), 0);
}

#[tokio::test]
async fn test_private_denial_serves_public_result() {
    let (state, connector) = setup();
    connector
        .private
        .fail_with(UpstreamError::Denied("insufficient scope".into()));
    let key = create_private_key(&state).await;

    let resp = get(&state, "/access/private/listing/c", Some(&key)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["x-access-mode"], "public");
    assert_eq!(resp.headers()["x-access-fallback"], "true");

    let body = body_to_json(resp.into_body()).await;
    assert_eq!(body["data"]["files"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_detail_not_found_returns_404() {
    let (state, _) = setup();
    let resp = get(&state, "/access/public/detail/missing", None).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let body = body_to_json(resp.into_body()).await;
    assert_eq!(body["error"]["code"], 404);
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn test_upstream_denial_returns_403() {
    let (state, connector) = setup();
    connector
        .public
        .fail_with(UpstreamError::Denied("file not shared".into()));

    let resp = get(&state, "/access/public/detail/f1", None).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_upstream_timeout_returns_504() {
    let (state, connector) = setup();
    connector.public.delay_by(Duration::from_secs(5));

    let resp = get(&state, "/access/public/detail/f1", None).await;
    assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn test_unknown_mode_returns_400() {
    let (state, _) = setup();
    let resp = get(&state, "/access/shared/listing/c", None).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_path_returns_breadcrumbs() {
    let (state, _) = setup();
    let resp = get(&state, "/access/public/path/c", None).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_to_json(resp.into_body()).await;
    assert_eq!(
        body["data"],
        json!([
            { "id": "root", "name": "My Drive" },
            { "id": "a", "name": "Projects" },
            { "id": "b", "name": "2024" },
            { "id": "c", "name": "Reports" },
        ])
    );
}

#[tokio::test]
async fn test_path_of_missing_folder_is_empty_not_error() {
    let (state, _) = setup();
    let resp = get(&state, "/access/public/path/missing", None).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_to_json(resp.into_body()).await;
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn test_content_is_piped_through() {
    let (state, _) = setup();
    let resp = get(&state, "/access/public/content/f1", None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/plain");

    let bytes = body_to_bytes(resp.into_body()).await;
    assert_eq!(&bytes[..], b"contents of alpha.txt");
}
