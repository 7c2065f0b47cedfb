use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::rejection::WebSocketUpgradeRejection,
    },
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::warn;

use mabu_gateway::connection;
use mabu_types::api::AuthUser;

use crate::auth::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct GatewayQuery {
    pub token: Option<String>,
}

/// GET /gateway
///
/// A token at upgrade time (`?token=` or a bearer header) is checked before
/// the socket exists; a bad one is answered with the usual error body and no
/// upgrade. Without a token the socket must identify itself first.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let authenticated = match upgrade_identity(&state, query.token.as_deref(), &headers) {
        Ok(user) => user,
        Err(e) => {
            warn!("Rejected gateway upgrade: {}", e);
            return e.into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let dispatcher = state.dispatcher.clone();
    match authenticated {
        Some(user) => ws.on_upgrade(move |socket| {
            connection::handle_connection_authenticated(socket, dispatcher, user)
        }),
        None => {
            let tokens = state.sessions.access_tokens().clone();
            ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, tokens))
        }
    }
}

/// `Ok(None)` when no credential was offered at upgrade time.
fn upgrade_identity(
    state: &AppState,
    query_token: Option<&str>,
    headers: &HeaderMap,
) -> Result<Option<AuthUser>, ApiError> {
    if let Some(token) = query_token.map(str::trim).filter(|t| !t.is_empty()) {
        return Ok(Some(state.sessions.access_tokens().verify(token)?));
    }

    let auth_header = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    match auth_header {
        Some(value) => Ok(Some(state.sessions.authenticate(Some(value))?)),
        None => Ok(None),
    }
}
