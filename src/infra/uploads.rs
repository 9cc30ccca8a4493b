//! Filesystem storage for blob bytes and their resized variants.

use std::error::Error as StdError;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use futures::{StreamExt, pin_mut, stream};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};

use crate::domain::types::ImageVariant;
use crate::domain::uploads::is_valid_blob_key;

#[derive(Debug, Error)]
pub enum UploadStorageError {
    #[error("invalid blob key")]
    InvalidKey,
    #[error("stored file not found")]
    Missing,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("uploaded file stream failed")]
    PayloadStream {
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("uploaded file size exceeds supported range")]
    SizeOverflow,
}

/// Result of writing a blob's bytes.
#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub sha256: String,
    pub size_bytes: i64,
}

#[derive(Debug)]
pub struct UploadStorage {
    root: PathBuf,
}

impl UploadStorage {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Stream a payload to `key`, replacing any earlier contents once fully written.
    pub async fn store_stream<S>(&self, key: &str, stream: S) -> Result<StoredUpload, UploadStorageError>
    where
        S: futures::Stream<Item = Result<Bytes, UploadStorageError>>,
    {
        let target = self.blob_path(key)?;
        self.write_atomically(&target, stream).await
    }

    pub async fn store(&self, key: &str, data: Bytes) -> Result<StoredUpload, UploadStorageError> {
        let stream = stream::once(async move { Ok::<_, UploadStorageError>(data) });
        self.store_stream(key, stream).await
    }

    pub async fn store_variant(
        &self,
        key: &str,
        variant: ImageVariant,
        data: Bytes,
    ) -> Result<StoredUpload, UploadStorageError> {
        let target = self.variant_path(key, variant)?;
        let stream = stream::once(async move { Ok::<_, UploadStorageError>(data) });
        self.write_atomically(&target, stream).await
    }

    pub async fn read(&self, key: &str) -> Result<Bytes, UploadStorageError> {
        read_file(self.blob_path(key)?).await
    }

    pub async fn read_variant(
        &self,
        key: &str,
        variant: ImageVariant,
    ) -> Result<Bytes, UploadStorageError> {
        read_file(self.variant_path(key, variant)?).await
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf, UploadStorageError> {
        if !is_valid_blob_key(key) {
            return Err(UploadStorageError::InvalidKey);
        }
        // Two-level fan-out keeps directories small.
        self.resolve(&format!("{}/{}/{key}", &key[..key.len().min(2)], shard(key)))
    }

    fn variant_path(&self, key: &str, variant: ImageVariant) -> Result<PathBuf, UploadStorageError> {
        if !is_valid_blob_key(key) {
            return Err(UploadStorageError::InvalidKey);
        }
        self.resolve(&format!("variants/{key}/{}", variant.as_str()))
    }

    fn resolve(&self, stored_path: &str) -> Result<PathBuf, UploadStorageError> {
        let relative = Path::new(stored_path);
        if relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(UploadStorageError::InvalidKey);
        }

        Ok(self.root.join(relative))
    }

    async fn write_atomically<S>(
        &self,
        target: &Path,
        stream: S,
    ) -> Result<StoredUpload, UploadStorageError>
    where
        S: futures::Stream<Item = Result<Bytes, UploadStorageError>>,
    {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let partial = target.with_extension("partial");

        let mut file = fs::File::create(&partial).await?;
        let mut hasher = Sha256::new();
        let mut total_bytes: u64 = 0;

        pin_mut!(stream);
        while let Some(chunk_result) = stream.next().await {
            let chunk = match chunk_result {
                Ok(chunk) => chunk,
                Err(err) => {
                    drop(file);
                    let _ = fs::remove_file(&partial).await;
                    return Err(err);
                }
            };

            total_bytes = total_bytes
                .checked_add(chunk.len() as u64)
                .ok_or(UploadStorageError::SizeOverflow)?;
            file.write_all(&chunk).await?;
            hasher.update(&chunk);
        }

        file.flush().await?;
        drop(file);
        fs::rename(&partial, target).await?;

        let size_bytes =
            i64::try_from(total_bytes).map_err(|_| UploadStorageError::SizeOverflow)?;
        Ok(StoredUpload {
            sha256: hex::encode(hasher.finalize().as_slice()),
            size_bytes,
        })
    }
}

fn shard(key: &str) -> &str {
    key.get(2..4).unwrap_or("00")
}

async fn read_file(path: PathBuf) -> Result<Bytes, UploadStorageError> {
    match fs::read(&path).await {
        Ok(data) => Ok(Bytes::from(data)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(UploadStorageError::Missing),
        Err(err) => Err(UploadStorageError::Io(err)),
    }
}
