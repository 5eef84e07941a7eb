//! Session and CSRF middleware.
//!
//! The session layer resolves the cookie on every request, validates or
//! rotates through the manager, and rewrites the cookie whenever the
//! session was created, rotated, or flagged for refresh. A request whose
//! session fails validation silently continues as a fresh anonymous
//! session; nothing about the failure leaks to the client.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, Method, header},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::config::{Config, ServerConfig};
use crate::entities::sessions;
use crate::session::fingerprint::{FingerprintTier, fingerprint};
use crate::session::manager::{SessionContext, SessionStatus};

use super::{ApiError, AppState};

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("")
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then_some(value)
    })
}

/// Build the Set-Cookie value for a session record. Max-age tracks the
/// session kind's expiry window.
pub fn session_cookie(config: &Config, session: &sessions::Model) -> HeaderValue {
    let max_age_days = if session.is_temporary {
        config.session.temporary_ttl_days
    } else {
        config.session.permanent_ttl_days
    };
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        config.server.session_cookie_name,
        session.id,
        max_age_days * 86_400
    );
    if config.server.secure_cookies {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static(""))
}

fn is_exempt(config: &ServerConfig, path: &str) -> bool {
    config
        .csrf_exempt_prefixes
        .iter()
        .any(|prefix| path.starts_with(prefix))
}

pub async fn session_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let config = state.shared.config().await;

    if is_exempt(&config.server, request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let headers = request.headers().clone();
    let user_agent = header_str(&headers, "user-agent");
    let accept_language = header_str(&headers, "accept-language");
    let accept_encoding = header_str(&headers, "accept-encoding");
    let ip = client_ip(&headers);

    let strict_fp = fingerprint(
        user_agent,
        accept_language,
        accept_encoding,
        FingerprintTier::Strict,
    );
    let loose_fp = fingerprint(
        user_agent,
        accept_language,
        accept_encoding,
        FingerprintTier::Loose,
    );

    let sessions = &state.shared.sessions;

    let context: SessionContext = match cookie_value(&headers, &config.server.session_cookie_name)
    {
        Some(session_id) => {
            let lookup = sessions
                .get(session_id, &strict_fp, &loose_fp, ip.as_deref())
                .await?;

            match (lookup.status, lookup.session) {
                (SessionStatus::Valid, Some(session)) => SessionContext {
                    session,
                    needs_cookie_update: lookup.needs_cookie_update,
                    security_event: lookup.security_event,
                },
                (SessionStatus::Rotated, Some(session)) => {
                    if sessions.detect_suspicious_activity(&session) {
                        warn!(
                            user = %session.user_id,
                            rotations = session.rotation_count,
                            "Rotation cadence anomaly, session flagged"
                        );
                    }
                    sessions.rotate(&session).await?
                }
                _ => {
                    // Failed closed upstream; the request continues with a
                    // fresh anonymous identity.
                    sessions
                        .create(None, user_agent, ip.as_deref(), accept_language, accept_encoding)
                        .await?
                }
            }
        }
        None => {
            sessions
                .create(None, user_agent, ip.as_deref(), accept_language, accept_encoding)
                .await?
        }
    };

    if let Some(event) = &context.security_event {
        warn!(user = %context.session.user_id, event = %event, "Session security event");
    }

    let needs_cookie_update = context.needs_cookie_update;
    let cookie = session_cookie(&config, &context.session);

    request.extensions_mut().insert(context);
    let mut response = next.run(request).await;

    if needs_cookie_update {
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }

    Ok(response)
}

/// Every mutating request must present the session's anti-forgery token
/// in the configured header, compared constant-time. Non-mutating methods
/// and exempt prefixes are never checked.
pub async fn csrf_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let method = request.method().clone();
    if method == Method::GET || method == Method::HEAD || method == Method::OPTIONS {
        return Ok(next.run(request).await);
    }

    let config = state.shared.config().await;
    if is_exempt(&config.server, request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let Some(context) = request.extensions().get::<SessionContext>() else {
        return Err(ApiError::SessionInvalid);
    };

    let presented = header_str(request.headers(), &config.server.csrf_header_name);
    let expected = context.session.csrf_token.as_bytes();

    let matches = presented.len() == expected.len()
        && bool::from(presented.as_bytes().ct_eq(expected));

    if !matches {
        return Err(ApiError::CsrfRejected);
    }

    Ok(next.run(request).await)
}
