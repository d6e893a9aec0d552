#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod chunker;
pub mod pipeline;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_fixtures;
pub mod upload;
pub mod utils;

use chrono::Utc;
use common::error::AppError;
use common::storage::{
    db::SurrealDbClient,
    types::vectorize_job::{VectorizeJob, DEFAULT_LEASE_SECS},
};
pub use pipeline::ProcessingPipeline;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
pub use upload::UploadPipeline;
use uuid::Uuid;

/// Claim-and-dispatch loop of a worker process.
///
/// Jobs run on spawned tasks, at most `concurrency` at a time; the loop only
/// claims when a slot is free so reserved jobs never sit idle behind a full
/// worker. Runs until the process is shut down.
pub async fn run_worker_loop(
    db: Arc<SurrealDbClient>,
    pipeline: Arc<ProcessingPipeline>,
    concurrency: usize,
) -> Result<(), AppError> {
    let worker_id = format!("vectorize-worker-{}", Uuid::new_v4());
    let lease_duration = Duration::from_secs(DEFAULT_LEASE_SECS as u64);
    let idle_backoff = Duration::from_millis(500);
    let slots = Arc::new(Semaphore::new(concurrency.max(1)));

    loop {
        let permit = slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|err| AppError::InternalError(err.to_string()))?;

        match VectorizeJob::claim_next_ready(&db, &worker_id, Utc::now(), lease_duration).await {
            Ok(Some(job)) => {
                let job_id = job.id.clone();
                info!(
                    %worker_id,
                    %job_id,
                    document_id = %job.document_id,
                    attempt = job.attempts,
                    "claimed vectorization job"
                );
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(err) = pipeline.process_job(job).await {
                        error!(%job_id, error = %err, "vectorization job failed");
                    }
                });
            }
            Ok(None) => {
                drop(permit);
                sleep(idle_backoff).await;
            }
            Err(err) => {
                drop(permit);
                error!(%worker_id, error = %err, "failed to claim vectorization job");
                warn!("Backing off for 1s after claim error");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::pdf_with_pages;
    use bytes::Bytes;
    use common::progress::ProgressBroker;
    use common::storage::store::StorageManager;
    use common::storage::types::document::{Document, DocumentStatus};
    use common::utils::config::{AppConfig, StorageKind};
    use common::utils::embedding::EmbeddingProvider;
    use object_store::memory::InMemory;

    #[tokio::test]
    async fn test_worker_loop_processes_uploaded_document() {
        let config = AppConfig {
            embedding_backend: "hashed".to_string(),
            embedding_dimensions: 8,
            chunk_size: 200,
            chunk_overlap: 20,
            job_timeout_secs: 30,
            worker_concurrency: 2,
            ..AppConfig::default()
        };

        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("in-memory surrealdb"),
        );
        db.ensure_initialized(8).await.expect("schema init");

        let storage =
            StorageManager::with_backend(Arc::new(InMemory::new()), StorageKind::Memory);
        let broker = ProgressBroker::new(db.clone());
        let embedder = Arc::new(EmbeddingProvider::new_hashed(8));

        let uploader = UploadPipeline::new(db.clone(), storage.clone(), config.clone());
        let pipeline = Arc::new(ProcessingPipeline::new(
            db.clone(),
            storage,
            broker,
            embedder,
            config.clone(),
        ));

        let document = uploader
            .submit(
                "acme",
                "handbook.pdf",
                Bytes::from(pdf_with_pages(&["worker loop page"])),
                "application/pdf",
            )
            .await
            .expect("upload");

        let worker = tokio::spawn(run_worker_loop(
            db.clone(),
            pipeline,
            config.worker_concurrency,
        ));

        // Poll until the worker has driven the document to a terminal state.
        let mut status = DocumentStatus::Queued;
        for _ in 0..100 {
            if let Some(stored) = db
                .get_item::<Document>(&document.id)
                .await
                .expect("fetch document")
            {
                status = stored.status;
                if status.is_terminal() {
                    break;
                }
            }
            sleep(Duration::from_millis(100)).await;
        }
        worker.abort();

        assert_eq!(status, DocumentStatus::Completed);
    }
}
