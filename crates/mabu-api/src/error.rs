use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use mabu_auth::TokenError;
use mabu_types::api::ErrorBody;

/// Everything a handler can fail with. Rendered as `{"error": .., "code"?: ..}`.
#[derive(Debug, Error)]
pub enum ApiError {
    // Credential failures share one message so callers cannot enumerate accounts
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Account blocked, contact an administrator")]
    AccountBlocked,
    #[error("Please verify your email before signing in")]
    EmailNotVerified,

    #[error("Authentication required")]
    Unauthorized,
    #[error("Access token expired")]
    TokenExpired,
    #[error("Invalid access token")]
    InvalidToken,
    #[error("Invalid or expired refresh token")]
    InvalidOrExpiredRefreshToken,

    #[error("Message must contain text, an image or a listing")]
    EmptyMessage,
    #[error("Invalid recipient")]
    InvalidRecipient,

    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Forbidden")]
    Forbidden,
    #[error("Image exceeds the size limit")]
    PayloadTooLarge,
    #[error("Only image uploads are accepted")]
    UnsupportedMediaType,

    #[error("Internal server error, please retry later")]
    Store(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials
            | Self::Unauthorized
            | Self::TokenExpired
            | Self::InvalidToken
            | Self::InvalidOrExpiredRefreshToken => StatusCode::UNAUTHORIZED,
            Self::AccountBlocked | Self::EmailNotVerified | Self::Forbidden => StatusCode::FORBIDDEN,
            Self::EmptyMessage | Self::InvalidRecipient | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code. Only expiry gets one: clients branch on it to
    /// refresh silently.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::TokenExpired => Some("TOKEN_EXPIRED"),
            _ => None,
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => Self::TokenExpired,
            TokenError::Invalid => Self::InvalidToken,
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Store(anyhow::anyhow!("spawn_blocking join error: {}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Store(err) = &self {
            error!("Store failure: {:?}", err);
        }

        let body = ErrorBody {
            error: self.to_string(),
            code: self.code().map(str::to_string),
        };
        (self.status(), Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
