use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

use mabu_auth::{AccessTokens, TokenError};
use mabu_types::api::AuthUser;
use mabu_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a socket may stay anonymous before it is closed.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle a socket whose token was already verified at the HTTP upgrade.
pub async fn handle_connection_authenticated(socket: WebSocket, dispatcher: Dispatcher, user: AuthUser) {
    let (sender, receiver) = socket.split();
    info!("{} ({}) connected to gateway (token at upgrade)", user.name, user.id);
    run_connection_loop(sender, receiver, dispatcher, user).await;
}

/// Handle a socket that must authenticate with an Identify command first.
/// Nothing is delivered until the token checks out.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, tokens: AccessTokens) {
    let (mut sender, mut receiver) = socket.split();

    let user = match wait_for_identify(&mut receiver, &tokens).await {
        Some(user) => user,
        None => {
            warn!("WebSocket client failed to identify, closing");
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    info!("{} ({}) connected to gateway", user.name, user.id);
    run_connection_loop(sender, receiver, dispatcher, user).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    user: AuthUser,
) {
    // Join before Ready so nothing published after Ready can be missed
    let (conn_id, mut user_rx) = dispatcher.join(user.id).await;

    let ready = GatewayEvent::Ready {
        user_id: user.id,
        name: user.name.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        dispatcher.leave(user.id, conn_id).await;
        return;
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward room events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = user_rx.recv() => {
                    let Some(event) = result else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // The client has nothing to say once identified; only liveness matters
    let user_id = user.id;
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Pong(_) => pong_flag_recv.store(true, Ordering::Release),
                Message::Close(_) => break,
                Message::Text(text) => {
                    let preview: String = text.chars().take(200).collect();
                    debug!("Ignoring client frame from {}: {}", user_id, preview);
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.leave(user.id, conn_id).await;
    info!("{} ({}) disconnected from gateway", user.name, user.id);
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), ()> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            // Skip the event, keep the connection
            error!("Failed to serialize {} event: {}", event.name(), e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

/// Wait for a valid Identify command. A rejected token ends the handshake;
/// anything that is not an Identify command is ignored until the timeout.
async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    tokens: &AccessTokens,
) -> Option<AuthUser> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            let Message::Text(text) = msg else { continue };
            let Ok(GatewayCommand::Identify { token }) = serde_json::from_str::<GatewayCommand>(&text) else {
                continue;
            };

            return match tokens.verify(&token) {
                Ok(user) => Some(user),
                Err(TokenError::Expired) => {
                    warn!("Gateway identify with expired token");
                    None
                }
                Err(TokenError::Invalid) => {
                    warn!("Gateway identify with invalid token");
                    None
                }
            };
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify).await.ok().flatten()
}
