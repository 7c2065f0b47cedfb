use serde::{Deserialize, Serialize};

use crate::models::{Message, Notification, UserId};

/// Events pushed over the gateway, serialized as `{"type": .., "data": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms the connection joined the user's room
    #[serde(rename = "ready")]
    Ready { user_id: UserId, name: String },

    /// A direct message was stored; sent to both participants
    #[serde(rename = "message:new")]
    MessageNew(Message),

    /// A notification was created for the recipient
    #[serde(rename = "notify:new")]
    NotifyNew(Notification),
}

impl GatewayEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::MessageNew(_) => "message:new",
            Self::NotifyNew(_) => "notify:new",
        }
    }
}

/// Commands sent FROM client TO server over the websocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate a connection that did not present a token at upgrade time
    #[serde(rename = "identify")]
    Identify { token: String },
}
