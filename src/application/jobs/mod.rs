mod blobs;
mod context;
mod purge_tokens;
mod queue;

pub use blobs::{
    BlobJobOutcome, ImageJobError, SkipReason, process_blob_after_creation,
    process_blob_after_creation_job, process_image, process_image_job,
};
pub use context::{JobWorkerContext, PurgeTokensContext, job_failed};
pub use purge_tokens::{
    PurgeExpiredTokensJob, process_purge_expired_tokens_job, purge_expired_tokens_schedule,
};
pub use queue::{
    ImageProcessingJobPayload, JobQueue, ProcessBlobJobPayload, QueuedJob,
    enqueue_image_processing_job, enqueue_process_blob_job,
};
