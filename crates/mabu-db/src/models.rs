//! Row types as they come out of SQLite. The API shapes live in mabu-types.
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub is_active: bool,
    pub email_verified: bool,
    pub verification_code: Option<String>,
    pub verification_expires_at: Option<DateTime<Utc>>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub verification_code: Option<&'a str>,
    pub verification_expires_at: Option<DateTime<Utc>>,
}

/// A message joined with whatever the listings table knows about its
/// referenced listing.
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub from_user_id: i64,
    pub to_user_id: i64,
    pub body: String,
    pub image_url: Option<String>,
    pub listing_id: Option<i64>,
    pub listing_title: Option<String>,
    pub listing_price: Option<i64>,
    pub listing_thumbnail: Option<String>,
    pub listing_exists: bool,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
}

pub struct NewMessage<'a> {
    pub from_user_id: i64,
    pub to_user_id: i64,
    pub body: &'a str,
    pub image_url: Option<&'a str>,
    pub listing_id: Option<i64>,
}

/// Latest message exchanged with one partner.
#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub partner_id: i64,
    pub partner_name: Option<String>,
    pub partner_avatar: Option<String>,
    pub message_id: i64,
    pub body: String,
    pub image_url: Option<String>,
    pub listing_id: Option<i64>,
    pub from_user_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NotificationRow {
    pub id: i64,
    pub recipient_id: i64,
    pub category: String,
    pub body: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}
