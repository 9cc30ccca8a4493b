//! Blob intake and image post-processing workers.
//!
//! Intake only decides whether an upload needs processing and flips the
//! `processing_queued` flag before enqueueing. The flag is read and written
//! without a lock, so two racing intakes may both enqueue; the processing job
//! tolerates that by skipping blobs already marked `processed`.

use apalis::prelude::{Data, Error as ApalisError};
use bytes::Bytes;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    application::repos::RepoError,
    domain::{entities::BlobRecord, types::ImageVariant},
    infra::{
        images::{self, ImageProcessingError},
        uploads::UploadStorageError,
    },
};

use super::{
    context::{JobWorkerContext, job_failed},
    queue::{ImageProcessingJobPayload, ProcessBlobJobPayload, enqueue_image_processing_job},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Missing,
    NotImage,
    AlreadyProcessed,
    AlreadyQueued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobJobOutcome {
    Skipped(SkipReason),
    Queued,
    Processed,
}

impl BlobJobOutcome {
    fn label(self) -> &'static str {
        match self {
            BlobJobOutcome::Skipped(_) => "skipped",
            BlobJobOutcome::Queued => "queued",
            BlobJobOutcome::Processed => "processed",
        }
    }
}

#[derive(Debug, Error)]
pub enum ImageJobError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Storage(#[from] UploadStorageError),
    #[error(transparent)]
    Image(#[from] ImageProcessingError),
    #[error("image worker panicked: {0}")]
    Worker(String),
}

/// Decide whether a freshly uploaded blob needs image processing and queue it once.
pub async fn process_blob_after_creation(
    ctx: &JobWorkerContext,
    blob_id: Uuid,
) -> Result<BlobJobOutcome, RepoError> {
    let Some(mut blob) = ctx.blobs.find_blob(blob_id).await? else {
        info!(
            target = "willow::application::jobs::blobs",
            blob_id = %blob_id,
            "Blob not found, skipping intake"
        );
        return Ok(BlobJobOutcome::Skipped(SkipReason::Missing));
    };

    if !blob.is_image() {
        return Ok(BlobJobOutcome::Skipped(SkipReason::NotImage));
    }
    if blob.metadata.processed {
        return Ok(BlobJobOutcome::Skipped(SkipReason::AlreadyProcessed));
    }
    if blob.metadata.processing_queued {
        return Ok(BlobJobOutcome::Skipped(SkipReason::AlreadyQueued));
    }

    blob.metadata.processing_queued = true;
    ctx.blobs.update_blob_metadata(blob.id, &blob.metadata).await?;
    enqueue_image_processing_job(ctx.queue.as_ref(), blob.id).await?;

    info!(
        target = "willow::application::jobs::blobs",
        blob_id = %blob.id,
        "Queued image processing for direct upload"
    );
    Ok(BlobJobOutcome::Queued)
}

pub async fn process_blob_after_creation_job(
    payload: ProcessBlobJobPayload,
    context: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    // Intake failures are logged only; the upload itself already succeeded.
    match process_blob_after_creation(&context, payload.blob_id).await {
        Ok(outcome) => record_outcome("process_blob_after_creation", outcome),
        Err(err) => {
            metrics::counter!("willow_image_jobs_total", "job" => "process_blob_after_creation", "outcome" => "failed")
                .increment(1);
            error!(
                target = "willow::application::jobs::blobs",
                blob_id = %payload.blob_id,
                error = %err,
                "Failed to queue image processing"
            );
        }
    }
    Ok(())
}

/// Strip metadata from an uploaded image, fix its orientation and derive resized variants.
pub async fn process_image(
    ctx: &JobWorkerContext,
    blob_id: Uuid,
) -> Result<BlobJobOutcome, ImageJobError> {
    let Some(mut blob) = ctx.blobs.find_blob(blob_id).await? else {
        info!(
            target = "willow::application::jobs::blobs",
            blob_id = %blob_id,
            "Blob not found, skipping image processing"
        );
        return Ok(BlobJobOutcome::Skipped(SkipReason::Missing));
    };

    if !blob.is_image() {
        return Ok(BlobJobOutcome::Skipped(SkipReason::NotImage));
    }
    if blob.metadata.processed {
        return Ok(BlobJobOutcome::Skipped(SkipReason::AlreadyProcessed));
    }

    let mut byte_size = blob.byte_size;
    if blob.is_processable() {
        let original = ctx.storage.read(&blob.key).await?;
        let content_type = blob.content_type.clone().unwrap_or_default();

        let processed = run_blocking({
            let content_type = content_type.clone();
            move || images::reencode(&original, &content_type)
        })
        .await??;

        if let Some((width, height)) = processed.dimensions {
            blob.metadata.width = Some(width);
            blob.metadata.height = Some(height);
        }
        match processed.bytes {
            Some(bytes) => {
                let bytes = Bytes::from(bytes);
                let stored = ctx.storage.store(&blob.key, bytes.clone()).await?;
                byte_size = stored.size_bytes;
                if processed.resizable {
                    create_variants(ctx, &mut blob, &content_type, bytes).await;
                }
            }
            None => info!(
                target = "willow::application::jobs::blobs",
                blob_id = %blob.id,
                content_type = %content_type,
                "Keeping image as uploaded"
            ),
        }
    }

    blob.metadata.processed = true;
    ctx.blobs
        .update_blob_contents(blob.id, byte_size, &blob.metadata)
        .await?;

    info!(
        target = "willow::application::jobs::blobs",
        blob_id = %blob.id,
        byte_size,
        "Processed image blob"
    );
    Ok(BlobJobOutcome::Processed)
}

pub async fn process_image_job(
    payload: ImageProcessingJobPayload,
    context: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    match process_image(&context, payload.blob_id).await {
        Ok(outcome) => {
            record_outcome("image_processing", outcome);
            Ok(())
        }
        Err(err) => {
            metrics::counter!("willow_image_jobs_total", "job" => "image_processing", "outcome" => "failed")
                .increment(1);
            error!(
                target = "willow::application::jobs::blobs",
                blob_id = %payload.blob_id,
                error = %err,
                "Error processing image blob"
            );
            Err(job_failed(err))
        }
    }
}

/// A failed variant is logged and left unmarked; it never fails the job.
async fn create_variants(
    ctx: &JobWorkerContext,
    blob: &mut BlobRecord,
    content_type: &str,
    source: Bytes,
) {
    for variant in ImageVariant::ALL {
        if blob.metadata.has_variant(variant) {
            continue;
        }
        match write_variant(ctx, &blob.key, content_type, source.clone(), variant).await {
            Ok(()) => blob.metadata.mark_variant(variant),
            Err(err) => warn!(
                target = "willow::application::jobs::blobs",
                blob_id = %blob.id,
                variant = variant.as_str(),
                error = %err,
                "Failed to create image variant"
            ),
        }
    }
}

async fn write_variant(
    ctx: &JobWorkerContext,
    key: &str,
    content_type: &str,
    source: Bytes,
    variant: ImageVariant,
) -> Result<(), ImageJobError> {
    let content_type = content_type.to_string();
    let resized = run_blocking(move || {
        images::resize_to_fit(&source, &content_type, variant.max_dimension())
    })
    .await??;
    ctx.storage
        .store_variant(key, variant, Bytes::from(resized))
        .await?;
    Ok(())
}

async fn run_blocking<T, F>(work: F) -> Result<T, ImageJobError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| ImageJobError::Worker(err.to_string()))
}

fn record_outcome(job: &'static str, outcome: BlobJobOutcome) {
    metrics::counter!("willow_image_jobs_total", "job" => job, "outcome" => outcome.label())
        .increment(1);
}
