use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{application::repos::RepoError, domain::types::JobType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessBlobJobPayload {
    pub blob_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageProcessingJobPayload {
    pub blob_id: Uuid,
}

/// A job ready to hand to the queue backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuedJob {
    ProcessBlob(ProcessBlobJobPayload),
    ImageProcessing(ImageProcessingJobPayload),
}

impl QueuedJob {
    pub fn job_type(&self) -> JobType {
        match self {
            QueuedJob::ProcessBlob(_) => JobType::ProcessBlobAfterCreation,
            QueuedJob::ImageProcessing(_) => JobType::ImageProcessing,
        }
    }

    pub fn blob_id(&self) -> Uuid {
        match self {
            QueuedJob::ProcessBlob(payload) => payload.blob_id,
            QueuedJob::ImageProcessing(payload) => payload.blob_id,
        }
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: QueuedJob) -> Result<(), RepoError>;
}

pub async fn enqueue_process_blob_job<Q: JobQueue + ?Sized>(
    queue: &Q,
    blob_id: Uuid,
) -> Result<(), RepoError> {
    queue
        .enqueue(QueuedJob::ProcessBlob(ProcessBlobJobPayload { blob_id }))
        .await
}

pub async fn enqueue_image_processing_job<Q: JobQueue + ?Sized>(
    queue: &Q,
    blob_id: Uuid,
) -> Result<(), RepoError> {
    queue
        .enqueue(QueuedJob::ImageProcessing(ImageProcessingJobPayload { blob_id }))
        .await
}
