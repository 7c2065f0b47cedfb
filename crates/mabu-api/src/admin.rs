use axum::{
    Extension, Json,
    extract::State,
};
use tracing::info;

use mabu_types::api::{AuthUser, SetUserStatusRequest, StatusResponse};
use mabu_types::models::UserId;

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};
use crate::extract::{AppJson, AppPath};

/// POST /admin/users/{id}/status
///
/// Only flips the flag. Live refresh tokens of a deactivated user are
/// revoked the next time one is presented.
pub async fn set_user_status(
    State(state): State<AppState>,
    AppPath(user_id): AppPath<UserId>,
    Extension(admin): Extension<AuthUser>,
    AppJson(req): AppJson<SetUserStatusRequest>,
) -> ApiResult<Json<StatusResponse>> {
    if user_id == admin.id {
        return Err(ApiError::Validation("Cannot change your own status".into()));
    }

    let active = req.active;
    let found = state
        .with_db(move |db| db.set_user_active(user_id, active))
        .await?;
    if !found {
        return Err(ApiError::NotFound("User not found".into()));
    }

    info!(
        "Admin {} set user {} to {}",
        admin.id,
        user_id,
        if active { "active" } else { "blocked" }
    );
    Ok(Json(StatusResponse { ok: true }))
}
