use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;

use mabu_types::api::{AuthUser, Claims};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    /// Signature is fine but `exp` has passed. Clients refresh on this.
    #[error("token has expired")]
    Expired,
    /// Malformed, wrong signature, or missing claims.
    #[error("invalid token")]
    Invalid,
}

/// Issues and verifies HS256 access tokens for one signing secret.
#[derive(Clone)]
pub struct AccessTokens {
    encoding: EncodingKey,
    decoding: DecodingKey,
    lifetime: Duration,
}

impl AccessTokens {
    pub fn new(secret: &str, lifetime: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            lifetime,
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn issue(&self, user: &AuthUser) -> Result<String> {
        self.issue_at(user, Utc::now())
    }

    /// `exp` is whole seconds rounded down, so a token never outlives
    /// `issued_at + lifetime`; it may expire up to a second early.
    pub fn issue_at(&self, user: &AuthUser, issued_at: DateTime<Utc>) -> Result<String> {
        let claims = Claims {
            sub: user.id,
            role: user.role,
            name: user.name.clone(),
            iat: issued_at.timestamp(),
            exp: (issued_at + self.lifetime).timestamp(),
        };

        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    pub fn verify(&self, token: &str) -> Result<AuthUser, TokenError> {
        self.verify_at(token, Utc::now())
    }

    /// Expired from the instant `now` reaches `exp`. jsonwebtoken compares in
    /// whole seconds and would still accept the token during its last second.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<AuthUser, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;

        let claims = match decode::<Claims>(token, &self.decoding, &validation) {
            Ok(data) => data.claims,
            Err(_) => return Err(TokenError::Invalid),
        };

        let expires_at = DateTime::<Utc>::from_timestamp(claims.exp, 0).ok_or(TokenError::Invalid)?;
        if now >= expires_at {
            return Err(TokenError::Expired);
        }
        Ok(claims.into())
    }
}
