/// Mabu credential primitives.
///
/// - `password`: Argon2id hashing for stored credentials
/// - `tokens`: short-lived signed access tokens (HS256)
/// - `refresh`: opaque refresh tokens and email verification codes
///
/// Nothing in here touches the database; the session manager in mabu-api
/// combines these with the store.

pub mod password;
pub mod refresh;
pub mod tokens;

pub use tokens::{AccessTokens, TokenError};
