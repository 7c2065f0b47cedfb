use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use tracing::{error, info};

use mabu_auth::password::hash_password;
use mabu_auth::refresh::generate_verification_code;
use mabu_db::Database;
use mabu_db::models::NewUser;
use mabu_gateway::Dispatcher;
use mabu_types::api::{
    AuthUser, LoginRequest, RefreshTokenRequest, RegisterRequest, ResendCodeRequest, StatusResponse,
    VerifyEmailRequest,
};

use crate::conversations::ConversationStore;
use crate::error::{ApiError, ApiResult};
use crate::extract::AppJson;
use crate::mailer::Mailer;
use crate::session::{SessionManager, user_profile};
use crate::uploads::ImageStore;

/// How long an emailed verification code stays valid, in minutes.
pub const VERIFICATION_CODE_MINUTES: i64 = 15;

const USERNAME_MIN: usize = 4;
const USERNAME_MAX: usize = 50;
const PASSWORD_MIN: usize = 6;
const EMAIL_MAX: usize = 100;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub sessions: SessionManager,
    pub conversations: ConversationStore,
    pub dispatcher: Dispatcher,
    pub images: ImageStore,
    pub mailer: Mailer,
}

impl AppStateInner {
    /// Run a store call on the blocking pool.
    pub async fn with_db<F, T>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        Ok(tokio::task::spawn_blocking(move || f(&db)).await??)
    }
}

pub async fn register(
    State(state): State<AppState>,
    AppJson(req): AppJson<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let username = req.username.trim().to_string();
    let email = req.email.trim().to_string();

    let name_len = username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&name_len) {
        return Err(ApiError::Validation(format!(
            "Username must be {USERNAME_MIN} to {USERNAME_MAX} characters"
        )));
    }
    if req.password.chars().count() < PASSWORD_MIN {
        return Err(ApiError::Validation(format!(
            "Password must be at least {PASSWORD_MIN} characters"
        )));
    }
    if email.len() > EMAIL_MAX || !looks_like_email(&email) {
        return Err(ApiError::Validation("Invalid email address".into()));
    }

    let code = generate_verification_code();
    let now = Utc::now();

    let (user_id, row) = {
        let (username, email, code) = (username.clone(), email.clone(), code.clone());
        let password = req.password;
        state
            .with_db(move |db| {
                if db.username_or_email_taken(&username, &email)? {
                    return Ok(None);
                }
                let password_hash = hash_password(&password)?;
                let created = db.create_user(
                    &NewUser {
                        username: &username,
                        email: &email,
                        password_hash: &password_hash,
                        verification_code: Some(&code),
                        verification_expires_at: Some(now + Duration::minutes(VERIFICATION_CODE_MINUTES)),
                    },
                    now,
                );
                // A concurrent registration can win between the check and the insert
                let id = match created {
                    Ok(id) => id,
                    Err(e) if mabu_db::is_unique_violation(&e) => return Ok(None),
                    Err(e) => return Err(e),
                };
                Ok(db.get_user_by_id(id)?.map(|row| (id, row)))
            })
            .await?
            .ok_or_else(|| ApiError::Conflict("Username or email already exists".into()))?
    };

    info!("Registered {} ({})", username, user_id);

    // Account exists either way; a failed send can be retried via resend
    if let Err(e) = state.mailer.send_verification_code(&email, &username, &code).await {
        error!("Failed to send verification code to user {}: {:#}", user_id, e);
    }

    Ok((StatusCode::CREATED, Json(user_profile(&row)?)))
}

pub async fn verify_email(
    State(state): State<AppState>,
    AppJson(req): AppJson<VerifyEmailRequest>,
) -> ApiResult<Json<StatusResponse>> {
    let email = req.email.trim().to_string();
    let code = req.code.trim().to_string();
    let now = Utc::now();

    let verified = state
        .with_db(move |db| {
            let Some(user) = db.get_user_by_email(&email)? else {
                return Ok(false);
            };
            if user.email_verified {
                return Ok(true);
            }

            let matches = user.verification_code.as_deref() == Some(code.as_str())
                && user.verification_expires_at.is_some_and(|exp| exp > now);
            if matches {
                db.mark_email_verified(user.id)?;
                info!("User {} verified their email", user.id);
            }
            Ok(matches)
        })
        .await?;

    if !verified {
        return Err(ApiError::Validation("Invalid or expired verification code".into()));
    }
    Ok(Json(StatusResponse { ok: true }))
}

/// Always answers ok so the endpoint cannot be used to enumerate accounts.
pub async fn resend_verify_code(
    State(state): State<AppState>,
    AppJson(req): AppJson<ResendCodeRequest>,
) -> ApiResult<Json<StatusResponse>> {
    let email = req.email.trim().to_string();
    let code = generate_verification_code();
    let now = Utc::now();

    let target = {
        let (email, code) = (email.clone(), code.clone());
        state
            .with_db(move |db| {
                let Some(user) = db.get_user_by_email(&email)? else {
                    return Ok(None);
                };
                if user.email_verified {
                    return Ok(None);
                }
                db.set_verification_code(user.id, &code, now + Duration::minutes(VERIFICATION_CODE_MINUTES))?;
                Ok(Some(user))
            })
            .await?
    };

    if let Some(user) = target {
        if let Err(e) = state
            .mailer
            .send_verification_code(&user.email, &user.username, &code)
            .await
        {
            error!("Failed to resend verification code to user {}: {:#}", user.id, e);
        }
    }

    Ok(Json(StatusResponse { ok: true }))
}

pub async fn login(
    State(state): State<AppState>,
    AppJson(req): AppJson<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let response = state.sessions.login(&req.identifier, &req.password).await?;
    Ok(Json(response))
}

pub async fn refresh(
    State(state): State<AppState>,
    AppJson(req): AppJson<RefreshTokenRequest>,
) -> ApiResult<impl IntoResponse> {
    let response = state.sessions.refresh(&req.refresh_token).await?;
    Ok(Json(response))
}

pub async fn logout(
    State(state): State<AppState>,
    AppJson(req): AppJson<RefreshTokenRequest>,
) -> ApiResult<Json<StatusResponse>> {
    state.sessions.logout(&req.refresh_token).await?;
    Ok(Json(StatusResponse { ok: true }))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let row = state
        .with_db(move |db| db.get_user_by_id(user.id))
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
    Ok(Json(user_profile(&row)?))
}

fn looks_like_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}
