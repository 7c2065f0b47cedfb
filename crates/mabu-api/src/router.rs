use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    handler::Handler,
    middleware,
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::auth::{self, AppState};
use crate::middleware::{require_admin, require_auth};
use crate::uploads::{MAX_IMAGE_SIZE, PUBLIC_PREFIX};
use crate::{admin, conversations, gateway, messages, notifications};

/// Room for the multipart framing and text fields around the image.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// The whole HTTP surface, ready to serve.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/verify-email", post(auth::verify_email))
        .route("/auth/resend-verify-code", post(auth::resend_verify_code))
        .route("/sessions", post(auth::login).delete(auth::logout))
        .route("/sessions/refresh", post(auth::refresh))
        .route("/gateway", get(gateway::ws_upgrade))
        .with_state(state.clone());

    let admin_routes = Router::new()
        .route("/admin/users/{id}/status", post(admin::set_user_status))
        .layer(middleware::from_fn(require_admin));

    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversations/{partner_id}", get(conversations::get_thread))
        .route("/conversations/{partner_id}/messages", post(messages::send_message))
        .route(
            "/conversations/{partner_id}/messages/image",
            post(messages::send_image_message)
                .layer(DefaultBodyLimit::max(MAX_IMAGE_SIZE + MULTIPART_OVERHEAD)),
        )
        .route("/conversations/{partner_id}/read", post(messages::mark_read))
        .route(
            "/notifications",
            get(notifications::list_notifications).post(
                notifications::create_notification.layer(middleware::from_fn(require_admin)),
            ),
        )
        .route("/notifications/{id}/read", post(notifications::mark_notification_read))
        .merge(admin_routes)
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(health))
        .merge(public_routes)
        .merge(protected_routes)
        .nest_service(PUBLIC_PREFIX, ServeDir::new(state.images.root()))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
