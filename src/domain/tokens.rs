//! API token generation and bearer parsing.

use rand::{RngCore, rngs::OsRng};
use time::OffsetDateTime;

use crate::domain::error::ValidationErrors;

const TOKEN_BYTES: usize = 16;
pub const TOKEN_LENGTH: usize = TOKEN_BYTES * 2;

/// 16 random bytes rendered as 32 lowercase hex characters.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// The token is the last whitespace-separated part of the header, so both
/// `Bearer abc` and a bare `abc` work.
pub fn extract_bearer(header: &str) -> Option<&str> {
    header.split_whitespace().last()
}

pub fn validate_new_token(
    name: &str,
    expires_at: Option<OffsetDateTime>,
    now: OffsetDateTime,
) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    if name.trim().is_empty() {
        errors.add("name", "can't be blank");
    }
    if let Some(expires_at) = expires_at
        && expires_at <= now
    {
        errors.add("expires_at", "must be in the future");
    }
    errors
}
