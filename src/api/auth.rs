//! Magic-link sign-in endpoints.
//!
//! Delivery of the link is an email collaborator's job; this surface
//! issues and consumes tokens. Consumption upgrades the caller's session
//! in place and rewrites the cookie.

use axum::{
    Extension, Json,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::session::manager::SessionContext;

use super::middleware::session_cookie;
use super::types::{ApiResponse, ConsumeLinkRequest, MagicLinkRequest, SessionInfo};
use super::{ApiError, AppState};

/// POST /api/auth/magic-link
pub async fn request_magic_link(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<SessionContext>,
    Json(body): Json<MagicLinkRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = body.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::ValidationError("A valid email is required".to_string()));
    }

    let link = state
        .shared
        .magic_links
        .issue(email, Some(&context.session.id))
        .await?;

    Ok(Json(ApiResponse::success(link)))
}

/// POST /api/auth/magic-link/consume
pub async fn consume_magic_link(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<ConsumeLinkRequest>,
) -> Result<Response, ApiError> {
    let user_agent = header_or_empty(&headers, "user-agent");
    let accept_language = header_or_empty(&headers, "accept-language");
    let accept_encoding = header_or_empty(&headers, "accept-encoding");
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let context = state
        .shared
        .magic_links
        .consume(&body.token, user_agent, ip, accept_language, accept_encoding)
        .await?;

    let config = state.shared.config().await;
    let cookie = session_cookie(&config, &context.session);

    let session = &context.session;
    let mut response = Json(ApiResponse::success(SessionInfo {
        user_id: session.user_id.clone(),
        namespace: session.namespace.clone(),
        is_temporary: session.is_temporary,
        vendor_context: session.vendor_context.clone(),
        csrf_token: session.csrf_token.clone(),
    }))
    .into_response();

    response.headers_mut().append(header::SET_COOKIE, cookie);
    Ok(response)
}

/// GET /api/auth/session — the caller's current session context.
pub async fn session_info(
    Extension(context): Extension<SessionContext>,
) -> Result<impl IntoResponse, ApiError> {
    let session = &context.session;
    Ok(Json(ApiResponse::success(SessionInfo {
        user_id: session.user_id.clone(),
        namespace: session.namespace.clone(),
        is_temporary: session.is_temporary,
        vendor_context: session.vendor_context.clone(),
        csrf_token: session.csrf_token.clone(),
    })))
}

fn header_or_empty<'a>(headers: &'a axum::http::HeaderMap, name: &str) -> &'a str {
    headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("")
}
