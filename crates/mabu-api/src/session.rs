use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use mabu_auth::AccessTokens;
use mabu_auth::password::{verify_against_dummy, verify_password};
use mabu_auth::refresh::{generate_refresh_token, hash_refresh_token};
use mabu_db::Database;
use mabu_db::models::UserRow;
use mabu_types::api::{AuthUser, LoginResponse, RefreshResponse};
use mabu_types::models::{Role, UserProfile};

use crate::error::{ApiError, ApiResult};

pub struct SessionConfig {
    pub access_tokens: AccessTokens,
    pub refresh_ttl: Duration,
    /// Refuse sign-in for accounts that never confirmed their email.
    pub require_email_verification: bool,
}

/// Credential checks, token issuance and session bookkeeping.
#[derive(Clone)]
pub struct SessionManager {
    db: Arc<Database>,
    config: Arc<SessionConfig>,
}

impl SessionManager {
    pub fn new(db: Arc<Database>, config: SessionConfig) -> Self {
        Self {
            db,
            config: Arc::new(config),
        }
    }

    pub fn access_tokens(&self) -> &AccessTokens {
        &self.config.access_tokens
    }

    pub async fn login(&self, identifier: &str, password: &str) -> ApiResult<LoginResponse> {
        let this = self.clone();
        let identifier = identifier.trim().to_string();
        let password = password.to_string();
        // Argon2 and SQLite both block
        tokio::task::spawn_blocking(move || this.login_at(&identifier, &password, Utc::now())).await?
    }

    pub async fn refresh(&self, refresh_token: &str) -> ApiResult<RefreshResponse> {
        let this = self.clone();
        let token = refresh_token.to_string();
        tokio::task::spawn_blocking(move || this.refresh_at(&token, Utc::now())).await?
    }

    /// Idempotent: an unknown token is not an error.
    pub async fn logout(&self, refresh_token: &str) -> ApiResult<()> {
        let db = self.db.clone();
        let hash = hash_refresh_token(refresh_token);
        let removed = tokio::task::spawn_blocking(move || db.delete_session(&hash)).await??;
        if removed > 0 {
            info!("Session ended");
        }
        Ok(())
    }

    /// Verify an `Authorization` header value.
    pub fn authenticate(&self, header: Option<&str>) -> ApiResult<AuthUser> {
        let token = header
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ApiError::Unauthorized)?;

        Ok(self.config.access_tokens.verify(token)?)
    }

    fn login_at(&self, identifier: &str, password: &str, now: DateTime<Utc>) -> ApiResult<LoginResponse> {
        if identifier.is_empty() || password.is_empty() {
            return Err(ApiError::Validation("Identifier and password are required".into()));
        }

        let Some(user) = self.db.get_user_by_login(identifier)? else {
            verify_against_dummy(password);
            return Err(ApiError::InvalidCredentials);
        };

        if !verify_password(password, &user.password_hash)? {
            warn!("Failed login for user {}", user.id);
            return Err(ApiError::InvalidCredentials);
        }
        self.check_account_gates(&user)?;

        let auth = auth_user(&user)?;
        let access_token = self.config.access_tokens.issue_at(&auth, now)?;

        let refresh_token = generate_refresh_token();
        self.db.insert_session(
            user.id,
            &hash_refresh_token(&refresh_token),
            now,
            now + self.config.refresh_ttl,
        )?;

        info!("{} ({}) signed in", user.username, user.id);
        Ok(LoginResponse {
            access_token,
            refresh_token,
            user: user_profile(&user)?,
        })
    }

    fn refresh_at(&self, refresh_token: &str, now: DateTime<Utc>) -> ApiResult<RefreshResponse> {
        let hash = hash_refresh_token(refresh_token);
        let user = self
            .db
            .find_session_user(&hash, now)?
            .ok_or(ApiError::InvalidOrExpiredRefreshToken)?;

        if !user.is_active {
            // Deactivated accounts lose the session for good
            self.db.delete_session(&hash)?;
            info!("Revoked session of blocked user {}", user.id);
            return Err(ApiError::AccountBlocked);
        }
        self.check_account_gates(&user)?;

        let access_token = self.config.access_tokens.issue_at(&auth_user(&user)?, now)?;
        Ok(RefreshResponse {
            access_token,
            user: user_profile(&user)?,
        })
    }

    fn check_account_gates(&self, user: &UserRow) -> ApiResult<()> {
        if !user.is_active {
            return Err(ApiError::AccountBlocked);
        }
        if self.config.require_email_verification && !user.email_verified {
            return Err(ApiError::EmailNotVerified);
        }
        Ok(())
    }
}

fn parse_role(row: &UserRow) -> anyhow::Result<Role> {
    row.role
        .parse()
        .map_err(|e| anyhow!("user {} has bad role: {}", row.id, e))
}

pub(crate) fn auth_user(row: &UserRow) -> anyhow::Result<AuthUser> {
    Ok(AuthUser {
        id: row.id,
        role: parse_role(row)?,
        name: row.username.clone(),
    })
}

pub(crate) fn user_profile(row: &UserRow) -> anyhow::Result<UserProfile> {
    Ok(UserProfile {
        id: row.id,
        username: row.username.clone(),
        email: row.email.clone(),
        role: parse_role(row)?,
        avatar_url: row.avatar_url.clone(),
        email_verified: row.email_verified,
        join_date: row.created_at,
    })
}
