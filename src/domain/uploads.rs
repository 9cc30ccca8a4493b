//! Direct-upload keys and the signed PUT target that replaces a presigned storage URL.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::error::ValidationErrors;

pub const FILENAME_MAX: usize = 255;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadSignatureError {
    #[error("upload link has expired")]
    Expired,
    #[error("upload signature does not match")]
    Invalid,
}

/// Blob attributes a client declares before sending the bytes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirectUploadRequest {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub byte_size: i64,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl DirectUploadRequest {
    pub fn validate(&self, max_bytes: u64) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        let filename = self.filename.trim();
        if filename.is_empty() {
            errors.add("filename", "can't be blank");
        } else if filename.chars().count() > FILENAME_MAX {
            errors.add("filename", format!("is too long (maximum is {FILENAME_MAX} characters)"));
        }
        if self.byte_size < 0 {
            errors.add("byte_size", "must be greater than or equal to 0");
        } else if u64::try_from(self.byte_size).is_ok_and(|size| size > max_bytes) {
            errors.add("byte_size", format!("must be less than or equal to {max_bytes}"));
        }
        errors
    }
}

/// Query string carried by a signed upload URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSignature {
    pub expires: i64,
    pub signature: String,
}

/// Storage keys are lowercase hex so they are safe as path segments.
pub fn generate_blob_key() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn is_valid_blob_key(key: &str) -> bool {
    !key.is_empty() && key.len() <= 64 && key.bytes().all(|b| b.is_ascii_alphanumeric())
}

pub fn sign_upload(secret: &str, key: &str, expires: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b"\n");
    hasher.update(key.as_bytes());
    hasher.update(b"\n");
    hasher.update(expires.to_string().as_bytes());
    hex::encode(hasher.finalize().as_slice())
}

pub fn verify_upload(
    secret: &str,
    key: &str,
    signature: &UploadSignature,
    now: OffsetDateTime,
) -> Result<(), UploadSignatureError> {
    let expected = sign_upload(secret, key, signature.expires);
    if expected
        .as_bytes()
        .ct_eq(signature.signature.as_bytes())
        .unwrap_u8()
        == 0
    {
        return Err(UploadSignatureError::Invalid);
    }
    if now.unix_timestamp() > signature.expires {
        return Err(UploadSignatureError::Expired);
    }
    Ok(())
}

/// Opaque identifier handed back to clients that embed the blob in markdown.
pub fn signed_blob_id(secret: &str, id: Uuid) -> String {
    let digest = Sha256::digest(format!("{secret}\nblob\n{id}").as_bytes());
    format!("{}--{}", id.simple(), hex::encode(&digest.as_slice()[..10]))
}
