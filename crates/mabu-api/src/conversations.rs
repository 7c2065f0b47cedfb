use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::State,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::debug;

use mabu_db::Database;
use mabu_db::models::{ConversationRow, MessageRow, NewMessage};
use mabu_types::api::AuthUser;
use mabu_types::models::{ConversationSummary, ListingId, ListingRef, Message, PublicUser, Thread, UserId};

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};
use crate::extract::AppPath;

/// A message as handed to the store. The timestamp is assigned on append.
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    pub from: UserId,
    pub to: UserId,
    pub text: String,
    pub image_url: Option<String>,
    pub listing_id: Option<ListingId>,
}

/// Durable record of direct messages between user pairs.
#[derive(Clone)]
pub struct ConversationStore {
    db: Arc<Database>,
}

impl ConversationStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Latest message per partner, most recent conversation first.
    pub async fn list_conversations(&self, user_id: UserId) -> ApiResult<Vec<ConversationSummary>> {
        let rows = self.run(move |db| db.list_conversations(user_id)).await?;
        Ok(rows.into_iter().map(summary_from_row).collect())
    }

    /// Full history with `other_id`, oldest first.
    pub async fn get_thread(&self, user_id: UserId, other_id: UserId) -> ApiResult<Thread> {
        let (partner, rows) = self
            .run(move |db| {
                let partner = db.get_user_by_id(other_id)?;
                let rows = db.get_thread(user_id, other_id)?;
                Ok((partner, rows))
            })
            .await?;

        let partner = partner.ok_or_else(|| ApiError::NotFound("User not found".into()))?;
        Ok(Thread {
            partner: PublicUser {
                id: partner.id,
                name: partner.username,
                avatar_url: partner.avatar_url,
            },
            messages: rows.into_iter().map(message_from_row).collect(),
        })
    }

    /// Validate and persist. The returned message carries the stored id and
    /// server timestamp.
    pub async fn append_message(&self, msg: OutgoingMessage) -> ApiResult<Message> {
        if msg.to <= 0 || msg.from == msg.to {
            return Err(ApiError::InvalidRecipient);
        }

        let text = msg.text.trim().to_string();
        let image_url = msg.image_url.filter(|url| !url.is_empty());
        if text.is_empty() && image_url.is_none() && msg.listing_id.is_none() {
            return Err(ApiError::EmptyMessage);
        }

        let (from, to, listing_id) = (msg.from, msg.to, msg.listing_id);
        let stored = self
            .run(move |db| {
                if db.get_user_by_id(to)?.is_none() {
                    return Ok(None);
                }
                let id = db.insert_message(
                    &NewMessage {
                        from_user_id: from,
                        to_user_id: to,
                        body: &text,
                        image_url: image_url.as_deref(),
                        listing_id,
                    },
                    Utc::now(),
                )?;
                db.get_message(id)
            })
            .await?
            .ok_or_else(|| ApiError::NotFound("Recipient not found".into()))?;

        debug!("Stored message {} from {} to {}", stored.id, from, to);
        Ok(message_from_row(stored))
    }

    /// Mark everything `from_user_id` sent to `user_id` as read.
    pub async fn mark_read(&self, user_id: UserId, from_user_id: UserId) -> ApiResult<usize> {
        self.run(move |db| db.mark_read(user_id, from_user_id)).await
    }

    async fn run<F, T>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        Ok(tokio::task::spawn_blocking(move || f(&db)).await??)
    }
}

fn message_from_row(row: MessageRow) -> Message {
    let listing = row.listing_id.map(|id| ListingRef {
        id,
        title: row.listing_title,
        price: row.listing_price,
        thumbnail: row.listing_thumbnail,
        available: row.listing_exists,
    });

    Message {
        id: row.id,
        from_user_id: row.from_user_id,
        to_user_id: row.to_user_id,
        text: row.body,
        image_url: row.image_url,
        listing,
        created_at: row.created_at,
        read: row.is_read,
    }
}

fn summary_from_row(row: ConversationRow) -> ConversationSummary {
    ConversationSummary {
        partner: PublicUser {
            id: row.partner_id,
            name: row
                .partner_name
                .unwrap_or_else(|| format!("User #{}", row.partner_id)),
            avatar_url: row.partner_avatar,
        },
        last_message_id: row.message_id,
        last_message: row.body,
        has_image: row.image_url.is_some(),
        last_image_url: row.image_url,
        has_listing: row.listing_id.is_some(),
        last_listing_id: row.listing_id,
        last_from_user_id: row.from_user_id,
        last_at: row.created_at,
    }
}

// -- Handlers --

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let conversations = state.conversations.list_conversations(user.id).await?;
    Ok(Json(conversations))
}

pub async fn get_thread(
    State(state): State<AppState>,
    AppPath(partner_id): AppPath<UserId>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    if partner_id <= 0 || partner_id == user.id {
        return Err(ApiError::InvalidRecipient);
    }
    let thread = state.conversations.get_thread(user.id, partner_id).await?;
    Ok(Json(thread))
}
