//! Direct uploads: blob registration, the signed PUT target and file serving.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::application::jobs::{JobQueue, enqueue_process_blob_job};
use crate::application::repos::{BlobsRepo, RepoError};
use crate::domain::entities::{BlobMetadata, BlobRecord};
use crate::domain::error::ValidationErrors;
use crate::domain::types::ImageVariant;
use crate::domain::uploads::{
    DirectUploadRequest, UploadSignature, UploadSignatureError, generate_blob_key,
    is_valid_blob_key, sign_upload, signed_blob_id, verify_upload,
};
use crate::infra::uploads::{UploadStorage, UploadStorageError};

pub const SERVICE_NAME: &str = "local";
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("{0}")]
    Validation(ValidationErrors),
    #[error(transparent)]
    Signature(#[from] UploadSignatureError),
    #[error("blob not found")]
    NotFound,
    #[error("upload size {actual} does not match the declared {expected} bytes")]
    SizeMismatch { expected: i64, actual: i64 },
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Storage(#[from] UploadStorageError),
}

/// Signing and limits for direct uploads.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub signing_secret: String,
    pub ttl: Duration,
    pub public_read_acl: bool,
    pub max_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlobJson {
    pub id: Uuid,
    pub key: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub metadata: BlobMetadata,
    pub service_name: String,
    pub byte_size: i64,
    pub checksum: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub signed_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectUploadTarget {
    pub url: String,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectUploadResponse {
    #[serde(flatten)]
    pub blob: BlobJson,
    pub direct_upload: DirectUploadTarget,
}

/// Bytes ready to send back to a client.
#[derive(Debug, Clone)]
pub struct ServedBlob {
    pub content_type: String,
    pub filename: String,
    pub bytes: Bytes,
}

#[derive(Clone)]
pub struct UploadService {
    blobs: Arc<dyn BlobsRepo>,
    storage: Arc<UploadStorage>,
    queue: Arc<dyn JobQueue>,
    policy: UploadPolicy,
}

impl UploadService {
    pub fn new(
        blobs: Arc<dyn BlobsRepo>,
        storage: Arc<UploadStorage>,
        queue: Arc<dyn JobQueue>,
        policy: UploadPolicy,
    ) -> Self {
        Self {
            blobs,
            storage,
            queue,
            policy,
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.policy.max_bytes
    }

    pub async fn create_direct_upload(
        &self,
        request: DirectUploadRequest,
    ) -> Result<DirectUploadResponse, UploadError> {
        request
            .validate(self.policy.max_bytes)
            .into_result()
            .map_err(UploadError::Validation)?;

        let filename = request.filename.trim().to_string();
        let content_type = request
            .content_type
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .or_else(|| mime_guess::from_path(&filename).first().map(|mime| mime.to_string()));

        let metadata: BlobMetadata =
            serde_json::from_value(Value::Object(client_metadata(request.metadata)))
                .unwrap_or_default();
        let blob = BlobRecord {
            id: Uuid::new_v4(),
            key: generate_blob_key(),
            filename,
            content_type,
            byte_size: request.byte_size,
            checksum: request.checksum,
            metadata,
            service_name: SERVICE_NAME.to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        self.blobs.insert_blob(blob.clone()).await?;

        let expires = (OffsetDateTime::now_utc() + self.policy.ttl).unix_timestamp();
        let signature = sign_upload(&self.policy.signing_secret, &blob.key, expires);
        let direct_upload = DirectUploadTarget {
            url: format!(
                "/uploads/direct/{}?expires={expires}&signature={signature}",
                blob.key
            ),
            headers: self.upload_headers(&blob),
        };

        tracing::info!(
            target = "willow::application::uploads",
            blob_id = %blob.id,
            key = %blob.key,
            byte_size = blob.byte_size,
            "Registered direct upload"
        );
        Ok(DirectUploadResponse {
            blob: self.blob_json(blob),
            direct_upload,
        })
    }

    /// Accept the bytes for a registered blob and hand it to the intake job.
    pub async fn receive_upload(
        &self,
        key: &str,
        signature: &UploadSignature,
        body: Bytes,
    ) -> Result<BlobRecord, UploadError> {
        if !is_valid_blob_key(key) {
            return Err(UploadError::NotFound);
        }
        verify_upload(
            &self.policy.signing_secret,
            key,
            signature,
            OffsetDateTime::now_utc(),
        )?;

        let blob = self
            .blobs
            .find_blob_by_key(key)
            .await?
            .ok_or(UploadError::NotFound)?;
        let actual = i64::try_from(body.len()).unwrap_or(i64::MAX);
        if actual != blob.byte_size {
            return Err(UploadError::SizeMismatch {
                expected: blob.byte_size,
                actual,
            });
        }

        self.storage.store(&blob.key, body).await?;

        if let Err(err) = enqueue_process_blob_job(self.queue.as_ref(), blob.id).await {
            tracing::error!(
                target = "willow::application::uploads",
                blob_id = %blob.id,
                error = %err,
                "Failed to enqueue blob intake"
            );
        }
        Ok(blob)
    }

    pub async fn serve(
        &self,
        key: &str,
        variant: Option<ImageVariant>,
    ) -> Result<ServedBlob, UploadError> {
        if !is_valid_blob_key(key) {
            return Err(UploadError::NotFound);
        }
        let blob = self
            .blobs
            .find_blob_by_key(key)
            .await?
            .ok_or(UploadError::NotFound)?;

        let bytes = match variant.filter(|variant| blob.metadata.has_variant(*variant)) {
            Some(variant) => self.storage.read_variant(&blob.key, variant).await,
            None => self.storage.read(&blob.key).await,
        }
        .map_err(|err| match err {
            UploadStorageError::Missing => UploadError::NotFound,
            other => UploadError::Storage(other),
        })?;

        Ok(ServedBlob {
            content_type: content_type_of(&blob),
            filename: blob.filename,
            bytes,
        })
    }

    fn upload_headers(&self, blob: &BlobRecord) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), content_type_of(blob));
        if let Some(checksum) = blob.checksum.as_deref() {
            headers.insert("Content-MD5".to_string(), checksum.to_string());
        }
        if self.policy.public_read_acl {
            headers.insert("x-amz-acl".to_string(), "public-read".to_string());
        }
        headers
    }

    fn blob_json(&self, blob: BlobRecord) -> BlobJson {
        BlobJson {
            signed_id: signed_blob_id(&self.policy.signing_secret, blob.id),
            id: blob.id,
            key: blob.key,
            filename: blob.filename,
            content_type: blob.content_type,
            metadata: blob.metadata,
            service_name: blob.service_name,
            byte_size: blob.byte_size,
            checksum: blob.checksum,
            created_at: blob.created_at,
        }
    }
}

fn content_type_of(blob: &BlobRecord) -> String {
    blob.content_type
        .clone()
        .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string())
}

/// Extra client metadata is kept but never allowed to set processing flags.
fn client_metadata(raw: Map<String, Value>) -> Map<String, Value> {
    raw.into_iter()
        .filter(|(key, _)| {
            !matches!(
                key.as_str(),
                "processed" | "processing_queued" | "variant_thumb" | "variant_medium" | "variant_large"
            )
        })
        .collect()
}
