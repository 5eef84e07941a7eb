use axum::{Extension, Json, extract::State, response::IntoResponse};
use std::sync::Arc;

use crate::session::manager::SessionContext;

use super::types::{ApiResponse, VendorContextRequest, VendorContextResponse};
use super::{ApiError, AppState};

/// POST /api/vendor-context
///
/// Switch which vendor sub-account the user is acting as. The update is
/// keyed by user id, so every concurrent session of this user (other
/// browser tabs included) picks up the new context.
pub async fn set_vendor_context(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<SessionContext>,
    Json(body): Json<VendorContextRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let sessions_updated = state
        .shared
        .sessions
        .set_vendor_context(&context.session.user_id, body.vendor_context.as_deref())
        .await?;

    Ok(Json(ApiResponse::success(VendorContextResponse {
        vendor_context: body.vendor_context,
        sessions_updated,
    })))
}
