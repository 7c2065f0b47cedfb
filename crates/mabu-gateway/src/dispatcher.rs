use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use mabu_types::events::GatewayEvent;
use mabu_types::models::UserId;

/// Identifies one live socket. A user may hold several at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct Subscriber {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

/// Routes events to every live connection of a user.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// Room per user: user_id -> live connections
    rooms: RwLock<HashMap<UserId, Vec<Subscriber>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to the user's room. Events published to the user are
    /// delivered on the returned receiver in publish order.
    pub async fn join(&self, user_id: UserId) -> (ConnectionId, mpsc::UnboundedReceiver<GatewayEvent>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .rooms
            .write()
            .await
            .entry(user_id)
            .or_default()
            .push(Subscriber { id, tx });
        (id, rx)
    }

    /// Remove one connection. Other connections of the same user stay joined.
    pub async fn leave(&self, user_id: UserId, conn_id: ConnectionId) {
        let mut rooms = self.inner.rooms.write().await;
        if let Some(subs) = rooms.get_mut(&user_id) {
            subs.retain(|s| s.id != conn_id);
            if subs.is_empty() {
                rooms.remove(&user_id);
            }
        }
    }

    /// Deliver an event to every connection in the user's room. Returns how
    /// many connections accepted it; zero when the user is offline.
    pub async fn publish(&self, user_id: UserId, event: GatewayEvent) -> usize {
        let mut rooms = self.inner.rooms.write().await;
        let Some(subs) = rooms.get_mut(&user_id) else {
            debug!("No live connections for user {}, dropping {}", user_id, event.name());
            return 0;
        };

        // Sockets that went away without leaving are pruned here
        subs.retain(|s| s.tx.send(event.clone()).is_ok());
        let delivered = subs.len();
        if delivered == 0 {
            rooms.remove(&user_id);
        }
        delivered
    }

    pub async fn connection_count(&self, user_id: UserId) -> usize {
        self.inner
            .rooms
            .read()
            .await
            .get(&user_id)
            .map_or(0, Vec::len)
    }

    /// Drop every room. Connection loops see their receiver close and exit.
    pub async fn shutdown(&self) {
        let mut rooms = self.inner.rooms.write().await;
        let users = rooms.len();
        rooms.clear();
        debug!("Gateway dispatcher cleared {} rooms", users);
    }
}
