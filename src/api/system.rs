use axum::{Json, extract::State, response::IntoResponse};
use std::sync::Arc;

use super::types::{ApiResponse, SystemStatus};
use super::{ApiError, AppState};

/// GET /healthz — liveness probe, bypasses session and CSRF layers.
pub async fn healthz() -> impl IntoResponse {
    Json(ApiResponse::success("ok"))
}

/// GET /api/status
pub async fn status(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let database_ok = state.shared.store.ping().await.is_ok();
    let processor_running = state.shared.processor.is_running().await;

    Ok(Json(ApiResponse::success(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        database_ok,
        processor_running,
    })))
}

/// GET /metrics — Prometheus exposition, present when metrics are enabled.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state
        .prometheus_handle
        .as_ref()
        .map_or_else(String::new, metrics_exporter_prometheus::PrometheusHandle::render)
}
