use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;

use mabu_db::models::NotificationRow;
use mabu_types::api::{AuthUser, CreateNotificationRequest, StatusResponse};
use mabu_types::events::GatewayEvent;
use mabu_types::models::Notification;

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};
use crate::extract::{AppJson, AppPath};

const CATEGORY_MAX: usize = 50;

/// GET /notifications, newest first.
pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let rows = state.with_db(move |db| db.list_notifications(user.id)).await?;
    let notifications: Vec<Notification> = rows.into_iter().map(notification_from_row).collect();
    Ok(Json(notifications))
}

/// POST /notifications (admin only). Stores and pushes `notify:new`.
pub async fn create_notification(
    State(state): State<AppState>,
    AppJson(req): AppJson<CreateNotificationRequest>,
) -> ApiResult<impl IntoResponse> {
    let category = req.category.trim().to_string();
    let body = req.body.trim().to_string();
    if category.is_empty() || category.chars().count() > CATEGORY_MAX {
        return Err(ApiError::Validation(format!(
            "Category must be 1 to {CATEGORY_MAX} characters"
        )));
    }
    if body.is_empty() {
        return Err(ApiError::Validation("Notification body is required".into()));
    }

    let to = req.to_user_id;
    let row = state
        .with_db(move |db| {
            if db.get_user_by_id(to)?.is_none() {
                return Ok(None);
            }
            let id = db.insert_notification(to, &category, &body, Utc::now())?;
            db.get_notification(id)
        })
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    let notification = notification_from_row(row);
    let live = state
        .dispatcher
        .publish(to, GatewayEvent::NotifyNew(notification.clone()))
        .await;
    info!("Notification {} for user {} ({} live connections)", notification.id, to, live);

    Ok((StatusCode::CREATED, Json(notification)))
}

/// POST /notifications/{id}/read. Only the recipient may mark it.
pub async fn mark_notification_read(
    State(state): State<AppState>,
    AppPath(id): AppPath<i64>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<StatusResponse>> {
    let affected = state
        .with_db(move |db| db.mark_notification_read(id, user.id))
        .await?;
    if affected == 0 {
        return Err(ApiError::NotFound("Notification not found".into()));
    }
    Ok(Json(StatusResponse { ok: true }))
}

fn notification_from_row(row: NotificationRow) -> Notification {
    Notification {
        id: row.id,
        recipient_id: row.recipient_id,
        category: row.category,
        body: row.body,
        read: row.is_read,
        created_at: row.created_at,
    }
}
