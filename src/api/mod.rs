use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

mod admin;
pub mod auth;
mod ctf;
mod error;
pub mod middleware;
mod system;
mod types;
mod vendor;

pub use error::ApiError;
pub use types::*;

use metrics_exporter_prometheus::PrometheusHandle;

#[derive(Clone)]
pub struct AppState {
    pub shared: Arc<SharedState>,

    pub start_time: std::time::Instant,

    pub prometheus_handle: Option<PrometheusHandle>,
}

pub fn create_app_state(
    shared: Arc<SharedState>,
    prometheus_handle: Option<PrometheusHandle>,
) -> Arc<AppState> {
    Arc::new(AppState {
        shared,
        start_time: std::time::Instant::now(),
        prometheus_handle,
    })
}

pub async fn router(state: Arc<AppState>) -> Router {
    let config = state.shared.config().await;

    let origins: Vec<HeaderValue> = config
        .server
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
        .allow_origin(origins);

    Router::new()
        .route("/healthz", get(system::healthz))
        .route("/metrics", get(system::metrics))
        .route("/api/status", get(system::status))
        .route("/api/auth/session", get(auth::session_info))
        .route("/api/auth/magic-link", post(auth::request_magic_link))
        .route("/api/auth/magic-link/consume", post(auth::consume_magic_link))
        .route("/api/ctf/progress", get(ctf::progress))
        .route("/api/vendor-context", post(vendor::set_vendor_context))
        .route("/api/admin/reload-definitions", post(admin::reload_definitions))
        // Layer order matters: the session layer (added last, runs first)
        // must populate the context the CSRF layer checks.
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::csrf_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::session_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
