use axum::{Json, extract::State, response::IntoResponse};
use std::sync::Arc;
use tracing::info;

use super::types::{ApiResponse, ReloadResponse};
use super::{ApiError, AppState};

/// POST /api/admin/reload-definitions
///
/// Re-reads every definition file and invalidates both rule caches. Safe
/// while the processor is running: in-flight evaluations may briefly use
/// a stale rule instance, which is accepted.
pub async fn reload_definitions(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let summary = state
        .shared
        .definitions
        .load_all(&state.shared.registry)
        .await?;

    state.shared.challenges.invalidate_cache().await;
    state.shared.badges.invalidate_cache().await;

    info!(
        challenges = summary.challenges,
        badges = summary.badges,
        skipped = summary.skipped,
        "Definitions reloaded"
    );

    Ok(Json(ApiResponse::success(ReloadResponse {
        challenges: summary.challenges,
        badges: summary.badges,
        skipped: summary.skipped,
    })))
}
