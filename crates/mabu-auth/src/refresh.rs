use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};

/// Random bytes behind every refresh token.
pub const REFRESH_TOKEN_BYTES: usize = 48;

/// Generate an opaque, URL-safe refresh token.
pub fn generate_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Digest stored in place of the token itself, so a leaked sessions table
/// cannot be replayed.
pub fn hash_refresh_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Six-digit email verification code.
pub fn generate_verification_code() -> String {
    format!("{:06}", rand::rng().random_range(0..1_000_000u32))
}
