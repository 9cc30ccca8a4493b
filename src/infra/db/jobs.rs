use apalis_sql::postgres::PostgresStorage;
use async_trait::async_trait;
use sqlx::{PgPool, migrate::MigrateError};

use crate::application::{
    jobs::{JobQueue, QueuedJob},
    repos::RepoError,
};

use super::{PostgresRepositories, map_sqlx_error};

const MAX_ATTEMPTS: i32 = 5;
const DEFAULT_PRIORITY: i32 = 0;

impl PostgresRepositories {
    /// Create the `apalis` schema the job workers poll. The schema is shared by every
    /// job type; the typed storages are built over the same pool afterwards.
    ///
    /// Both migrators record into `_sqlx_migrations`, so each ignores the other's versions.
    pub async fn setup_job_storage(pool: &PgPool) -> Result<(), MigrateError> {
        let mut migrator = PostgresStorage::<()>::migrations();
        migrator.set_ignore_missing(true);
        migrator.run(pool).await
    }
}

#[async_trait]
impl JobQueue for PostgresRepositories {
    async fn enqueue(&self, job: QueuedJob) -> Result<(), RepoError> {
        let payload = match job {
            QueuedJob::ProcessBlob(payload) => serde_json::to_value(payload),
            QueuedJob::ImageProcessing(payload) => serde_json::to_value(payload),
        }
        .map_err(RepoError::from_persistence)?;

        let id: String = sqlx::query_scalar(
            r#"
            SELECT (apalis.push_job($1, $2::json, 'Pending', now(), $3, $4)).id
            "#,
        )
        .bind(job.job_type().as_str())
        .bind(payload)
        .bind(MAX_ATTEMPTS)
        .bind(DEFAULT_PRIORITY)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        tracing::debug!(
            target = "willow::infra::db::jobs",
            job_id = %id,
            job_type = job.job_type().as_str(),
            blob_id = %job.blob_id(),
            "Enqueued job"
        );
        Ok(())
    }
}
