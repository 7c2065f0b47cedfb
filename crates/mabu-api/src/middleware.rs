use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use mabu_types::api::AuthUser;
use mabu_types::models::Role;

use crate::auth::AppState;
use crate::error::ApiError;

/// Validate the bearer token and attach the caller as an `AuthUser` extension.
/// Nothing downstream runs for a request that fails here.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let user = state.sessions.authenticate(auth_header)?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Must be layered inside `require_auth`.
pub async fn require_admin(req: Request, next: Next) -> Result<Response, ApiError> {
    match req.extensions().get::<AuthUser>() {
        Some(user) if user.role == Role::Admin => Ok(next.run(req).await),
        Some(_) => Err(ApiError::Forbidden),
        None => Err(ApiError::Unauthorized),
    }
}
