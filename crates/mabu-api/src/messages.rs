use axum::{
    Extension, Json,
    extract::{Multipart, State, multipart::MultipartError},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{debug, info, warn};

use mabu_types::api::{AuthUser, MarkReadResponse, SendMessageRequest};
use mabu_types::events::GatewayEvent;
use mabu_types::models::{ListingId, Message, UserId};

use crate::auth::{AppState, AppStateInner};
use crate::conversations::OutgoingMessage;
use crate::error::{ApiError, ApiResult};
use crate::extract::{AppJson, AppPath};

/// POST /conversations/{partner_id}/messages
pub async fn send_message(
    State(state): State<AppState>,
    AppPath(partner_id): AppPath<UserId>,
    Extension(user): Extension<AuthUser>,
    AppJson(req): AppJson<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    check_recipient(&user, partner_id)?;

    let text = req.text.unwrap_or_default();
    if text.trim().is_empty() && req.listing_id.is_none() {
        return Err(ApiError::EmptyMessage);
    }

    let message = state
        .conversations
        .append_message(OutgoingMessage {
            from: user.id,
            to: partner_id,
            text,
            image_url: None,
            listing_id: req.listing_id,
        })
        .await?;

    deliver(&state, &message).await;
    Ok((StatusCode::CREATED, Json(message)))
}

/// POST /conversations/{partner_id}/messages/image
///
/// Multipart fields: `image` (required), `text`, `listing_id`.
pub async fn send_image_message(
    State(state): State<AppState>,
    AppPath(partner_id): AppPath<UserId>,
    Extension(user): Extension<AuthUser>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    check_recipient(&user, partner_id)?;

    let mut image: Option<(Option<String>, Vec<u8>)> = None;
    let mut text = String::new();
    let mut listing_id: Option<ListingId> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name() {
            Some("image") => {
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(multipart_error)?;
                image = Some((content_type, bytes.to_vec()));
            }
            Some("text") => {
                text = field.text().await.map_err(multipart_error)?;
            }
            Some("listing_id") => {
                let raw = field.text().await.map_err(multipart_error)?;
                let raw = raw.trim();
                if !raw.is_empty() {
                    listing_id = Some(
                        raw.parse()
                            .map_err(|_| ApiError::Validation("listing_id must be a number".into()))?,
                    );
                }
            }
            other => {
                debug!("Ignoring multipart field {:?}", other);
            }
        }
    }

    let (content_type, bytes) = image.ok_or_else(|| ApiError::Validation("Image is required".into()))?;

    // Nothing touches the disk for a recipient that does not exist
    if state.with_db(move |db| db.get_user_by_id(partner_id)).await?.is_none() {
        return Err(ApiError::NotFound("Recipient not found".into()));
    }

    let image_url = state.images.save_image(content_type.as_deref(), &bytes).await?;

    let appended = state
        .conversations
        .append_message(OutgoingMessage {
            from: user.id,
            to: partner_id,
            text,
            image_url: Some(image_url.clone()),
            listing_id,
        })
        .await;

    let message = match appended {
        Ok(message) => message,
        Err(e) => {
            if let Err(cleanup) = state.images.remove_image(&image_url).await {
                warn!("Orphaned image {}: {:#}", image_url, cleanup);
            }
            return Err(e);
        }
    };

    deliver(&state, &message).await;
    Ok((StatusCode::CREATED, Json(message)))
}

/// POST /conversations/{partner_id}/read
pub async fn mark_read(
    State(state): State<AppState>,
    AppPath(partner_id): AppPath<UserId>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<MarkReadResponse>> {
    check_recipient(&user, partner_id)?;
    let affected = state.conversations.mark_read(user.id, partner_id).await?;
    Ok(Json(MarkReadResponse { affected }))
}

fn check_recipient(user: &AuthUser, partner_id: UserId) -> ApiResult<()> {
    if partner_id <= 0 || partner_id == user.id {
        return Err(ApiError::InvalidRecipient);
    }
    Ok(())
}

/// Push to the recipient, then to the sender's own connections.
async fn deliver(state: &AppStateInner, message: &Message) {
    let to = state
        .dispatcher
        .publish(message.to_user_id, GatewayEvent::MessageNew(message.clone()))
        .await;
    let from = state
        .dispatcher
        .publish(message.from_user_id, GatewayEvent::MessageNew(message.clone()))
        .await;
    info!(
        "Message {} from {} to {} (live: {} recipient, {} sender connections)",
        message.id, message.from_user_id, message.to_user_id, to, from
    );
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::Validation(err.body_text())
    }
}
