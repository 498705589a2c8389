use axum::http::StatusCode;
use serde_json::json;

use super::*;
use crate::test_helpers::spawn_http_stub;

fn test_user() -> Credentials {
    Credentials::new("test_user", "password")
}

#[tokio::test]
async fn acquire_token_returns_token_and_posts_credentials() {
    let (url, seen) = spawn_http_stub(StatusCode::OK, json!({"authToken": "abc123"})).await;
    let http = reqwest::Client::new();

    let token = acquire_token(&http, &format!("{url}/api/0.0.1/login"), &test_user())
        .await
        .expect("token");
    assert_eq!(token.as_str(), "abc123");

    let seen = seen.lock().expect("lock").clone();
    assert_eq!(seen.len(), 1);
    let body: Value = serde_json::from_str(&seen[0].body).expect("request json");
    assert_eq!(body, json!({"username": "test_user", "password": "password"}));
}

#[tokio::test]
async fn acquire_token_rejects_client_and_server_errors() {
    for status in [StatusCode::UNAUTHORIZED, StatusCode::BAD_REQUEST, StatusCode::INTERNAL_SERVER_ERROR] {
        let (url, _) = spawn_http_stub(status, json!({"error": "nope", "ok": false})).await;
        let err = acquire_token(&reqwest::Client::new(), &url, &test_user())
            .await
            .expect_err("non-2xx should fail");
        match err {
            AuthError::Rejected { status: got, body } => {
                assert_eq!(got, status.as_u16());
                assert!(body.contains("nope"));
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn acquire_token_requires_auth_token_field() {
    for body in [json!({}), json!({"auth_token": "abc"}), json!({"authToken": 7}), json!({"authToken": ""})] {
        let (url, _) = spawn_http_stub(StatusCode::OK, body).await;
        let err = acquire_token(&reqwest::Client::new(), &url, &test_user())
            .await
            .expect_err("missing token should fail");
        assert!(matches!(err, AuthError::MissingField("authToken")));
    }
}

#[tokio::test]
async fn acquire_token_validates_inputs_before_sending() {
    let (url, seen) = spawn_http_stub(StatusCode::OK, json!({"authToken": "abc123"})).await;
    let http = reqwest::Client::new();

    let err = acquire_token(&http, "", &test_user()).await.expect_err("empty endpoint");
    assert!(matches!(err, AuthError::InvalidRequest(_)));

    let err = acquire_token(&http, &url, &Credentials::new("", "password"))
        .await
        .expect_err("empty username");
    assert!(matches!(err, AuthError::InvalidRequest("username is empty")));

    let err = acquire_token(&http, &url, &Credentials::new("test_user", ""))
        .await
        .expect_err("empty password");
    assert!(matches!(err, AuthError::InvalidRequest("password is empty")));

    assert!(seen.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn acquire_token_reports_network_failure() {
    let addr = crate::test_helpers::dead_ws_address().await;
    let url = addr.replace("ws://", "http://");
    let err = acquire_token(&reqwest::Client::new(), &url, &test_user())
        .await
        .expect_err("nothing listening");
    assert!(matches!(err, AuthError::Http(_)));
}

#[tokio::test]
async fn register_returns_echoed_username() {
    let (url, seen) = spawn_http_stub(StatusCode::OK, json!({"username": "test_user"})).await;
    let username = register(&reqwest::Client::new(), &url, &test_user())
        .await
        .expect("register");
    assert_eq!(username, "test_user");
    assert_eq!(seen.lock().expect("lock").len(), 1);
}

#[tokio::test]
async fn register_surfaces_rejection() {
    let (url, _) = spawn_http_stub(StatusCode::CONFLICT, json!({"error": "taken"})).await;
    let err = register(&reqwest::Client::new(), &url, &test_user())
        .await
        .expect_err("conflict");
    assert!(matches!(err, AuthError::Rejected { status: 409, .. }));
}

#[tokio::test]
async fn check_health_reports_healthy_server() {
    let (url, _) = spawn_http_stub(StatusCode::OK, json!({"status": "healthy", "redis": "connected"})).await;
    let report = check_health(&reqwest::Client::new(), &url).await.expect("health");
    assert!(report.healthy);
    assert_eq!(report.http_status, 200);
    assert_eq!(report.redis.as_deref(), Some("connected"));
}

#[tokio::test]
async fn check_health_parses_unavailable_body() {
    let (url, _) = spawn_http_stub(
        StatusCode::SERVICE_UNAVAILABLE,
        json!({"status": "unhealthy", "redis": "disconnected"}),
    )
    .await;
    let report = check_health(&reqwest::Client::new(), &url).await.expect("health");
    assert!(!report.healthy);
    assert_eq!(report.http_status, 503);
    assert_eq!(report.status, "unhealthy");
}

#[tokio::test]
async fn check_health_rejects_other_statuses() {
    let (url, _) = spawn_http_stub(StatusCode::NOT_FOUND, json!({})).await;
    let err = check_health(&reqwest::Client::new(), &url).await.expect_err("404");
    assert!(matches!(err, AuthError::Rejected { status: 404, .. }));
}

#[tokio::test]
async fn logout_posts_bearer_token() {
    let (url, seen) = spawn_http_stub(
        StatusCode::OK,
        json!({"username": "test_user", "auth_token": null}),
    )
    .await;
    let token = AuthToken::new("abc123").expect("token");

    logout(&reqwest::Client::new(), &url, &token).await.expect("logout");

    let seen = seen.lock().expect("lock").clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, axum::http::Method::POST);
    assert_eq!(seen[0].authorization.as_deref(), Some("Bearer abc123"));
}

#[tokio::test]
async fn logout_with_stale_token_is_rejected() {
    let (url, _) = spawn_http_stub(StatusCode::UNAUTHORIZED, json!({"error": "unauthorized"})).await;
    let token = AuthToken::new("expired").expect("token");

    let err = logout(&reqwest::Client::new(), &url, &token)
        .await
        .expect_err("401");
    assert!(matches!(err, AuthError::Rejected { status: 401, .. }));
}

#[tokio::test]
async fn user_info_returns_username_for_token() {
    let (url, seen) = spawn_http_stub(StatusCode::OK, json!({"username": "test_user"})).await;
    let token = AuthToken::new("abc123").expect("token");

    let username = user_info(&reqwest::Client::new(), &url, &token)
        .await
        .expect("user info");
    assert_eq!(username, "test_user");

    let seen = seen.lock().expect("lock").clone();
    assert_eq!(seen[0].method, axum::http::Method::GET);
    assert_eq!(seen[0].authorization.as_deref(), Some("Bearer abc123"));
}

#[tokio::test]
async fn user_info_requires_username_field() {
    let (url, _) = spawn_http_stub(StatusCode::OK, json!({"name": "test_user"})).await;
    let token = AuthToken::new("abc123").expect("token");

    let err = user_info(&reqwest::Client::new(), &url, &token)
        .await
        .expect_err("missing username");
    assert!(matches!(err, AuthError::MissingField("username")));
}

#[test]
fn auth_token_rejects_empty_string() {
    assert!(AuthToken::new("").is_none());
    assert_eq!(AuthToken::new("t").map(|t| t.as_str().to_owned()), Some("t".to_owned()));
}

#[test]
fn debug_output_redacts_secrets() {
    let rendered = format!("{:?}", Credentials::new("test_user", "hunter2"));
    assert!(rendered.contains("test_user"));
    assert!(!rendered.contains("hunter2"));

    let rendered = format!("{:?}", AuthToken::new("abc123").expect("token"));
    assert!(!rendered.contains("abc123"));
}
