use async_trait::async_trait;
use sqlx::types::Json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{BlobsRepo, RepoError},
    domain::entities::{BlobMetadata, BlobRecord},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct BlobRow {
    id: Uuid,
    key: String,
    filename: String,
    content_type: Option<String>,
    byte_size: i64,
    checksum: Option<String>,
    metadata: Json<BlobMetadata>,
    service_name: String,
    created_at: OffsetDateTime,
}

impl From<BlobRow> for BlobRecord {
    fn from(row: BlobRow) -> Self {
        Self {
            id: row.id,
            key: row.key,
            filename: row.filename,
            content_type: row.content_type,
            byte_size: row.byte_size,
            checksum: row.checksum,
            metadata: row.metadata.0,
            service_name: row.service_name,
            created_at: row.created_at,
        }
    }
}

const BLOB_COLUMNS: &str =
    "id, key, filename, content_type, byte_size, checksum, metadata, service_name, created_at";

fn affected_one(rows: u64) -> Result<(), RepoError> {
    if rows == 0 {
        Err(RepoError::NotFound)
    } else {
        Ok(())
    }
}

#[async_trait]
impl BlobsRepo for PostgresRepositories {
    async fn insert_blob(&self, record: BlobRecord) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO blobs (
                id, key, filename, content_type, byte_size, checksum, metadata,
                service_name, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id)
        .bind(&record.key)
        .bind(&record.filename)
        .bind(&record.content_type)
        .bind(record.byte_size)
        .bind(&record.checksum)
        .bind(Json(&record.metadata))
        .bind(&record.service_name)
        .bind(record.created_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find_blob(&self, id: Uuid) -> Result<Option<BlobRecord>, RepoError> {
        let row = sqlx::query_as::<_, BlobRow>(&format!(
            "SELECT {BLOB_COLUMNS} FROM blobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(BlobRecord::from))
    }

    async fn find_blob_by_key(&self, key: &str) -> Result<Option<BlobRecord>, RepoError> {
        let row = sqlx::query_as::<_, BlobRow>(&format!(
            "SELECT {BLOB_COLUMNS} FROM blobs WHERE key = $1"
        ))
        .bind(key)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(BlobRecord::from))
    }

    async fn update_blob_metadata(
        &self,
        id: Uuid,
        metadata: &BlobMetadata,
    ) -> Result<(), RepoError> {
        let result = sqlx::query("UPDATE blobs SET metadata = $2 WHERE id = $1")
            .bind(id)
            .bind(Json(metadata))
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        affected_one(result.rows_affected())
    }

    async fn update_blob_contents(
        &self,
        id: Uuid,
        byte_size: i64,
        metadata: &BlobMetadata,
    ) -> Result<(), RepoError> {
        let result = sqlx::query("UPDATE blobs SET byte_size = $2, metadata = $3 WHERE id = $1")
            .bind(id)
            .bind(byte_size)
            .bind(Json(metadata))
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        affected_one(result.rows_affected())
    }
}
