use std::sync::Arc;

use apalis::prelude::Error as ApalisError;

use crate::{
    application::{jobs::JobQueue, repos::BlobsRepo, tokens::TokenService},
    infra::uploads::UploadStorage,
};

/// Shared context passed to blob workers.
#[derive(Clone)]
pub struct JobWorkerContext {
    pub blobs: Arc<dyn BlobsRepo>,
    pub storage: Arc<UploadStorage>,
    pub queue: Arc<dyn JobQueue>,
}

/// Context for the token purge cron worker.
#[derive(Clone)]
pub struct PurgeTokensContext {
    pub tokens: Arc<TokenService>,
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convert any error into an [`ApalisError::Failed`] so the queue retries it.
pub fn job_failed<E>(err: E) -> ApalisError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let boxed: BoxError = Box::new(err);
    ApalisError::Failed(Arc::new(boxed))
}
