use axum::{Extension, Json, extract::State, response::IntoResponse};
use serde::Serialize;
use std::sync::Arc;

use crate::services::badge_service::BadgeProgressView;
use crate::services::challenge_service::ChallengeProgressView;
use crate::session::manager::SessionContext;

use super::types::ApiResponse;
use super::{ApiError, AppState};

#[derive(Serialize)]
pub struct ProgressResponse {
    pub challenges: Vec<ChallengeProgressView>,
    pub badges: Vec<BadgeProgressView>,
}

/// GET /api/ctf/progress — the caller's challenge and badge state.
pub async fn progress(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<SessionContext>,
) -> Result<impl IntoResponse, ApiError> {
    let namespace = &context.session.namespace;
    let user_id = &context.session.user_id;

    let challenges = state.shared.challenges.progress_for(namespace, user_id).await?;
    let badges = state.shared.badges.progress_for(namespace, user_id).await?;

    Ok(Json(ApiResponse::success(ProgressResponse {
        challenges,
        badges,
    })))
}
