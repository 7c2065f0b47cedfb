use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Numeric account id, assigned by the store.
pub type UserId = i64;

/// Listing ids belong to the listing subsystem; messages only carry them.
pub type ListingId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Profile returned to the account owner. Never carries credential material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub avatar_url: Option<String>,
    pub email_verified: bool,
    pub join_date: DateTime<Utc>,
}

/// Identity shown for the other side of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: UserId,
    pub name: String,
    pub avatar_url: Option<String>,
}

/// Listing attached to a message. `available == false` means the listing no
/// longer exists and only the id is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRef {
    pub id: ListingId,
    pub title: Option<String>,
    pub price: Option<i64>,
    pub thumbnail: Option<String>,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub text: String,
    pub image_url: Option<String>,
    pub listing: Option<ListingRef>,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

/// One row per conversation partner, describing the latest message exchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub partner: PublicUser,
    pub last_message_id: i64,
    pub last_message: String,
    pub last_image_url: Option<String>,
    pub has_image: bool,
    pub last_listing_id: Option<ListingId>,
    pub has_listing: bool,
    pub last_from_user_id: UserId,
    pub last_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub partner: PublicUser,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub recipient_id: UserId,
    pub category: String,
    pub body: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}
