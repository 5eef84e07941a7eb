//! Web-surface tests: session cookie issuance, CSRF enforcement,
//! magic-link sign-in, admin reload.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;

use vendra::api;
use vendra::config::Config;
use vendra::events::InMemoryStreamTransport;
use vendra::state::SharedState;

const UA: &str = "Mozilla/5.0 (X11; Linux) Firefox/128.0";
const LANG: &str = "en-US,en;q=0.5";
const ENC: &str = "gzip, br";

async fn spawn_app() -> Router {
    let mut config = Config::default();
    config.general.database_path = "sqlite::memory:".to_string();
    config.server.secure_cookies = false;

    let shared = SharedState::with_transport(config, Arc::new(InMemoryStreamTransport::new()))
        .await
        .expect("Failed to create shared state");

    let state = api::create_app_state(Arc::new(shared), None);
    api::router(state).await
}

fn browser_request(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("user-agent", UA)
        .header("accept-language", LANG)
        .header("accept-encoding", ENC)
}

fn extract_session_cookie(response: &axum::http::Response<axum::body::Body>) -> Option<String> {
    response
        .headers()
        .get(header::SET_COOKIE)?
        .to_str()
        .ok()?
        .split(';')
        .next()
        .map(ToString::to_string)
}

async fn body_json(response: axum::http::Response<axum::body::Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// First contact: establish an anonymous session and return its cookie
/// pair (cookie, csrf token).
async fn establish_session(app: &Router) -> (String, String) {
    let response = app
        .clone()
        .oneshot(
            browser_request("GET", "/api/auth/session")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = extract_session_cookie(&response).expect("missing session cookie");
    let json = body_json(response).await;
    let csrf = json["data"]["csrf_token"].as_str().unwrap().to_string();
    (cookie, csrf)
}

#[tokio::test]
async fn test_healthz_bypasses_session_layer() {
    let app = spawn_app().await;

    let response = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn test_first_request_issues_anonymous_session() {
    let app = spawn_app().await;

    let response = app
        .clone()
        .oneshot(
            browser_request("GET", "/api/auth/session")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(extract_session_cookie(&response).is_some());

    let json = body_json(response).await;
    assert_eq!(json["data"]["is_temporary"], serde_json::json!(true));
    assert!(json["data"]["user_id"].as_str().unwrap().starts_with("t_"));
}

#[tokio::test]
async fn test_mutating_request_requires_csrf_token() {
    let app = spawn_app().await;
    let (cookie, csrf) = establish_session(&app).await;

    // No token: structured 403, distinct from a session failure.
    let response = app
        .clone()
        .oneshot(
            browser_request("POST", "/api/vendor-context")
                .header(header::COOKIE, cookie.clone())
                .header("content-type", "application/json")
                .body(Body::from("{\"vendor_context\": \"vendor-1\"}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = body_json(response).await;
    assert_eq!(json["success"], serde_json::json!(false));

    // Wrong token: same rejection.
    let response = app
        .clone()
        .oneshot(
            browser_request("POST", "/api/vendor-context")
                .header(header::COOKIE, cookie.clone())
                .header("x-csrf-token", "f".repeat(64))
                .header("content-type", "application/json")
                .body(Body::from("{\"vendor_context\": \"vendor-1\"}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Correct token: accepted.
    let response = app
        .clone()
        .oneshot(
            browser_request("POST", "/api/vendor-context")
                .header(header::COOKIE, cookie)
                .header("x-csrf-token", csrf)
                .header("content-type", "application/json")
                .body(Body::from("{\"vendor_context\": \"vendor-1\"}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["vendor_context"], serde_json::json!("vendor-1"));
}

#[tokio::test]
async fn test_non_mutating_requests_skip_csrf() {
    let app = spawn_app().await;
    let (cookie, _) = establish_session(&app).await;

    let response = app
        .clone()
        .oneshot(
            browser_request("GET", "/api/ctf/progress")
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_magic_link_sign_in_flow() {
    let app = spawn_app().await;
    let (cookie, csrf) = establish_session(&app).await;

    let response = app
        .clone()
        .oneshot(
            browser_request("POST", "/api/auth/magic-link")
                .header(header::COOKIE, cookie.clone())
                .header("x-csrf-token", csrf.clone())
                .header("content-type", "application/json")
                .body(Body::from("{\"email\": \"grace@example.com\"}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let token = json["data"]["token"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(
            browser_request("POST", "/api/auth/magic-link/consume")
                .header(header::COOKIE, cookie.clone())
                .header("x-csrf-token", csrf.clone())
                .header("content-type", "application/json")
                .body(Body::from(format!("{{\"token\": \"{token}\"}}")))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["is_temporary"], serde_json::json!(false));
    assert!(json["data"]["user_id"].as_str().unwrap().starts_with("u_"));

    // A second consumption of the same link is friendly-rejected.
    let response = app
        .clone()
        .oneshot(
            browser_request("POST", "/api/auth/magic-link/consume")
                .header(header::COOKIE, cookie)
                .header("x-csrf-token", csrf)
                .header("content-type", "application/json")
                .body(Body::from(format!("{{\"token\": \"{token}\"}}")))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GONE);
}

#[tokio::test]
async fn test_admin_reload_upserts_definitions() {
    let app = spawn_app().await;
    let (cookie, csrf) = establish_session(&app).await;

    // The repository ships a definitions/ directory; reload picks it up
    // and is idempotent across calls.
    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(
                browser_request("POST", "/api/admin/reload-definitions")
                    .header(header::COOKIE, cookie.clone())
                    .header("x-csrf-token", csrf.clone())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["data"]["challenges"], serde_json::json!(3));
        assert_eq!(json["data"]["badges"], serde_json::json!(3));
        assert_eq!(json["data"]["skipped"], serde_json::json!(0));
    }
}

#[tokio::test]
async fn test_status_endpoint_reports_health() {
    let app = spawn_app().await;
    let (cookie, _) = establish_session(&app).await;

    let response = app
        .clone()
        .oneshot(
            browser_request("GET", "/api/status")
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["data"]["database_ok"], serde_json::json!(true));
    assert_eq!(json["data"]["processor_running"], serde_json::json!(false));
}
