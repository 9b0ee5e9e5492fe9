//! Integration tests for the HTTP transport against a mock backend.

use std::sync::Arc;
use std::time::Duration;

use mano_core::auth::{Credential, CredentialStore, MemoryCredentialStore};
use mano_core::{ApiClient, ApiError};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn anonymous_client(server: &MockServer) -> ApiClient {
    ApiClient::new(server.uri(), Arc::new(MemoryCredentialStore::new())).unwrap()
}

fn authenticated_client(server: &MockServer) -> ApiClient {
    let store = MemoryCredentialStore::with_credential(Credential::new("tok-123", "partner@mano.vc"));
    ApiClient::new(server.uri(), Arc::new(store)).unwrap()
}

#[tokio::test]
async fn test_login_posts_form_without_bearer() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("username=partner%40mano.vc"))
        .and(body_string_contains("password=hunter2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok-new",
            "token_type": "bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let token = authenticated_client(&server)
        .login("partner@mano.vc", "hunter2")
        .await
        .unwrap();
    assert_eq!(token.access_token, "tok-new");

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("authorization").is_none());
    assert_eq!(
        requests[0].headers.get("content-type").unwrap(),
        "application/x-www-form-urlencoded"
    );
}

#[tokio::test]
async fn test_login_rejected_is_auth_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "Incorrect username or password"})))
        .mount(&server)
        .await;

    let err = anonymous_client(&server)
        .login("partner@mano.vc", "wrong")
        .await
        .unwrap_err();
    assert!(err.is_auth_rejected());
}

#[tokio::test]
async fn test_unreachable_backend_is_network_error() {
    // Nothing listens on port 1
    let client = ApiClient::with_timeout(
        "http://127.0.0.1:1",
        Arc::new(MemoryCredentialStore::new()),
        Duration::from_secs(2),
    )
    .unwrap();

    let err = client.login("partner@mano.vc", "hunter2").await.unwrap_err();
    assert!(matches!(err, ApiError::NetworkError(_)));
}

#[tokio::test]
async fn test_query_attaches_bearer_and_json_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/query"))
        .and(header("authorization", "Bearer tok-123"))
        .and(body_json(json!({"query": "top startups"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "formatted": "<p>ok</p>",
            "sql": "SELECT name FROM startups ORDER BY score DESC LIMIT 10"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = authenticated_client(&server)
        .submit_query("top startups", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(response.formatted.as_deref(), Some("<p>ok</p>"));
    assert!(response.extra.contains_key("sql"));
}

#[tokio::test]
async fn test_query_unauthorized_maps_to_unauthorized() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/query"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = anonymous_client(&server)
        .submit_query("top startups", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());
}

#[tokio::test]
async fn test_query_cancellation_abandons_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/query"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"formatted": "<p>late</p>"}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let client = authenticated_client(&server);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = client.submit_query("top startups", &cancel).await.unwrap_err();
    assert!(matches!(err, ApiError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_malformed_body_is_invalid_response() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/dashboard/metrics"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = authenticated_client(&server).fetch_metrics().await.unwrap_err();
    assert!(matches!(err, ApiError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_fetch_metrics_refetches_every_call() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/dashboard/metrics"))
        .and(header("authorization", "Bearer tok-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "active_deals": 1134,
            "pending_reminders": 24,
            "new_this_week": 38,
            "pipeline_data": [12, 8, 15, 5, 3]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = authenticated_client(&server);
    let first = client.fetch_metrics().await.unwrap();
    let snapshot = client.fetch_metrics_snapshot().await.unwrap();

    assert_eq!(first.active_deals, 1134);
    assert_eq!(snapshot.metrics, first);
    assert_eq!(snapshot.metrics.pipeline_total(), 43);
}

#[tokio::test]
async fn test_rate_limited_request_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/dashboard/metrics"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/dashboard/metrics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"active_deals": 7})))
        .mount(&server)
        .await;

    let metrics = authenticated_client(&server).fetch_metrics().await.unwrap();
    assert_eq!(metrics.active_deals, 7);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_interceptor_follows_store_changes() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/dashboard/metrics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::new());
    let client = ApiClient::new(server.uri(), store.clone()).unwrap();

    client.fetch_metrics().await.unwrap();
    store.save(&Credential::new("tok-later", "partner@mano.vc")).unwrap();
    client.fetch_metrics().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("authorization").is_none());
    assert_eq!(requests[1].headers.get("authorization").unwrap(), "Bearer tok-later");
}
