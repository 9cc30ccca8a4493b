//! Postgres-backed repository implementations.

mod blobs;
mod blogs;
mod jobs;
mod posts;
mod tags;
mod tokens;
mod users;
mod util;

pub use util::map_sqlx_error;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{
    query,
    postgres::{PgPool, PgPoolOptions},
};

use crate::application::repos::{HealthCheck, RepoError};

/// `/up` answers 503 rather than hanging on a saturated pool.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(3);

/// One handle implements every repository trait; the server and the job
/// monitor each get their own pool.
#[derive(Clone)]
pub struct PostgresRepositories {
    pool: Arc<PgPool>,
}

impl PostgresRepositories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
        let mut migrator = sqlx::migrate!("./migrations");
        // The apalis job schema shares the migrations table.
        migrator.set_ignore_missing(true);
        migrator.run(pool).await
    }

    async fn ping(&self) -> Result<(), RepoError> {
        query("SELECT 1")
            .execute(self.pool())
            .await
            .map(|_| ())
            .map_err(map_sqlx_error)
    }
}

#[async_trait]
impl HealthCheck for PostgresRepositories {
    async fn health_check(&self) -> Result<(), RepoError> {
        match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, self.ping()).await {
            Ok(result) => result,
            Err(_) => Err(RepoError::Timeout),
        }
    }
}
