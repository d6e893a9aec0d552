use std::sync::Arc;

use bytes::Bytes;
use tokio::time::{timeout, Duration};
use tracing::{error, info, info_span, warn};

use common::{
    error::AppError,
    progress::{ProgressBroker, ProgressEvent, ProgressStep},
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::{
            document::{Document, DocumentStatus},
            document_chunk::DocumentChunk,
            vectorize_job::VectorizeJob,
        },
    },
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};

use crate::{
    chunker::{self, TextFragment},
    utils::pdf,
};

/// Chunks indexed per add-documents call. Also the granularity of progress
/// reporting across the embed stage.
pub const EMBED_BATCH_SIZE: usize = 10;

/// Worker-side state machine driving a document from queued to completed or
/// failed, publishing progress on the document's channel at every stage.
pub struct ProcessingPipeline {
    db: Arc<SurrealDbClient>,
    storage: StorageManager,
    broker: ProgressBroker,
    embedder: Arc<EmbeddingProvider>,
    config: AppConfig,
}

impl ProcessingPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        storage: StorageManager,
        broker: ProgressBroker,
        embedder: Arc<EmbeddingProvider>,
        config: AppConfig,
    ) -> Self {
        Self {
            db,
            storage,
            broker,
            embedder,
            config,
        }
    }

    /// Queue-side entry point: settles the job record around one processing
    /// attempt. The document's own terminal state is the pipeline's
    /// responsibility; the job record only mirrors how the attempt went.
    pub async fn process_job(&self, job: VectorizeJob) -> Result<(), AppError> {
        let job_id = job.id.clone();
        let attempt = job.attempts;
        let worker_label = job
            .worker_id
            .clone()
            .unwrap_or_else(|| "unknown-worker".to_string());
        let span = info_span!(
            "vectorize_job",
            %job_id,
            attempt,
            worker_id = %worker_label,
            document_id = %job.document_id
        );
        let _enter = span.enter();

        let processing = job.mark_processing(&self.db).await?;

        match self
            .process(
                &processing.document_id,
                &processing.company_id,
                &processing.storage_key,
            )
            .await
        {
            Ok(()) => {
                processing.mark_succeeded(&self.db).await?;
                info!(%job_id, attempt, "vectorization job succeeded");
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                processing.mark_failed(reason.clone(), &self.db).await?;
                warn!(
                    %job_id,
                    attempt,
                    error = %reason,
                    "vectorization job failed; document left in failed state"
                );
                Err(AppError::Processing(reason))
            }
        }
    }

    /// Drive one document through download, chunk, embed, complete.
    ///
    /// Any stage error short-circuits into the failure handler, which always
    /// leaves the document in a terminal, observable state. The whole
    /// attempt runs under an owned deadline so a stuck collaborator cannot
    /// strand a document in `vectorizing` even if the queue-side lease
    /// timeout is misconfigured.
    pub async fn process(
        &self,
        document_id: &str,
        company_id: &str,
        storage_key: &str,
    ) -> Result<(), AppError> {
        let deadline = Duration::from_secs(self.config.job_timeout_secs);

        let result = match timeout(
            deadline,
            self.run_stages(document_id, company_id, storage_key),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AppError::Processing(format!(
                "Processing exceeded the {}s deadline",
                self.config.job_timeout_secs
            ))),
        };

        if let Err(err) = result {
            self.handle_failure(document_id, &err).await;
            return Err(err);
        }

        Ok(())
    }

    async fn run_stages(
        &self,
        document_id: &str,
        company_id: &str,
        storage_key: &str,
    ) -> Result<(), AppError> {
        // The queue delivers at least once. Re-read the authoritative status
        // before doing any work: a payload redelivered after the document
        // reached a terminal state is a no-op, not a reprocessing.
        match Document::get_scoped(&self.db, document_id, company_id).await? {
            Some(document) if document.status.is_terminal() => {
                info!(
                    %document_id,
                    status = document.status.as_str(),
                    "document already terminal; skipping redelivered job"
                );
                return Ok(());
            }
            Some(_) => {}
            None => {
                return Err(AppError::NotFound(format!(
                    "Document {document_id} no longer exists"
                )))
            }
        }

        let content = self.download(document_id, storage_key).await?;
        let (fragments, filename) = self.chunk(document_id, company_id, content).await?;
        let total_chunks = self
            .embed_and_index(document_id, company_id, &filename, fragments)
            .await?;
        self.complete(document_id, storage_key, total_chunks).await?;

        Ok(())
    }

    // ── Stages ──────────────────────────────────────────────────────────

    /// Fetch the raw bytes from the blob store (0% -> 10%).
    async fn download(&self, document_id: &str, storage_key: &str) -> Result<Bytes, AppError> {
        self.broker
            .publish(&ProgressEvent::new(
                document_id,
                ProgressStep::Downloading,
                0,
                "Downloading source file...",
            ))
            .await?;

        let content = self.storage.get(storage_key).await?;

        self.broker
            .publish(&ProgressEvent::new(
                document_id,
                ProgressStep::Downloading,
                10,
                "File downloaded",
            ))
            .await?;

        Ok(content)
    }

    /// Split the document into tagged fragments (10% -> 20%).
    ///
    /// The `vectorizing` status write is the first durable evidence that
    /// processing started. The filename is re-read from the Document row
    /// rather than taken from the queue payload, which may be stale.
    async fn chunk(
        &self,
        document_id: &str,
        company_id: &str,
        content: Bytes,
    ) -> Result<(Vec<TextFragment>, String), AppError> {
        Document::update_status(&self.db, document_id, DocumentStatus::Vectorizing, None).await?;
        self.broker
            .publish(&ProgressEvent::new(
                document_id,
                ProgressStep::Vectorizing,
                10,
                "Splitting document into chunks...",
            ))
            .await?;

        let document = Document::get_scoped(&self.db, document_id, company_id).await?;
        let filename = document
            .map(|d| d.filename)
            .unwrap_or_else(|| "unknown.pdf".to_string());

        let pages = pdf::extract_page_texts(content).await?;
        let fragments =
            chunker::split_pages(&pages, self.config.chunk_size, self.config.chunk_overlap)?;

        self.broker
            .publish(&ProgressEvent::new(
                document_id,
                ProgressStep::Vectorizing,
                20,
                format!("{} chunk(s) created", fragments.len()),
            ))
            .await?;

        Ok((fragments, filename))
    }

    /// Embed and index fragments in fixed-size batches (20% -> 95%).
    ///
    /// A failing batch aborts the whole attempt; batches already indexed by
    /// this attempt are not rolled back. Combined with at-least-once
    /// delivery this means duplicate chunks are possible and accepted, never
    /// a partially-"completed" status.
    async fn embed_and_index(
        &self,
        document_id: &str,
        company_id: &str,
        source: &str,
        fragments: Vec<TextFragment>,
    ) -> Result<usize, AppError> {
        let total_chunks = fragments.len();
        if total_chunks == 0 {
            return Ok(0);
        }

        let batches: Vec<&[TextFragment]> = fragments.chunks(EMBED_BATCH_SIZE).collect();
        let total_batches = batches.len();

        for (batch_idx, batch) in batches.iter().enumerate() {
            let texts: Vec<String> = batch.iter().map(|f| f.text.clone()).collect();
            let embeddings = self.embedder.embed_batch(texts).await?;
            if embeddings.len() != batch.len() {
                return Err(AppError::Processing(format!(
                    "Embedding returned {} vectors for a batch of {}",
                    embeddings.len(),
                    batch.len()
                )));
            }

            let chunks: Vec<DocumentChunk> = batch
                .iter()
                .zip(embeddings)
                .map(|(fragment, embedding)| {
                    DocumentChunk::new(
                        document_id.to_string(),
                        company_id.to_string(),
                        source.to_string(),
                        fragment.page_number,
                        fragment.chunk_index,
                        fragment.text.clone(),
                        embedding,
                    )
                })
                .collect();
            DocumentChunk::insert_batch(&self.db, chunks).await?;

            let progress = embed_progress(batch_idx + 1, total_batches);
            let processed = ((batch_idx + 1) * EMBED_BATCH_SIZE).min(total_chunks);
            self.broker
                .publish(&ProgressEvent::new(
                    document_id,
                    ProgressStep::Vectorizing,
                    progress,
                    format!("Indexed {processed}/{total_chunks} chunks"),
                ))
                .await?;
        }

        Ok(total_chunks)
    }

    /// Mark completed, drop the now-unneeded blob, emit the terminal event
    /// (100%).
    async fn complete(
        &self,
        document_id: &str,
        storage_key: &str,
        total_chunks: usize,
    ) -> Result<(), AppError> {
        Document::update_status(&self.db, document_id, DocumentStatus::Completed, None).await?;
        self.storage.delete(storage_key).await?;
        self.broker
            .publish(&ProgressEvent::completed(document_id, "Processing complete"))
            .await?;

        info!(%document_id, total_chunks, "document vectorized, source blob deleted");
        Ok(())
    }

    /// The attempt's last line of defense. Records `failed` with the error
    /// text and publishes the terminal event; its own errors are logged and
    /// swallowed so the document can never be left without a terminal,
    /// observable state by a second fault.
    async fn handle_failure(&self, document_id: &str, err: &AppError) {
        error!(%document_id, error = %err, "document processing failed");

        if let Err(db_err) = Document::update_status(
            &self.db,
            document_id,
            DocumentStatus::Failed,
            Some(err.to_string()),
        )
        .await
        {
            error!(%document_id, error = %db_err, "failed to record failed status");
        }

        if let Err(publish_err) = self
            .broker
            .publish(&ProgressEvent::failed(document_id, err.to_string()))
            .await
        {
            error!(%document_id, error = %publish_err, "failed to publish terminal failure event");
        }
    }
}

/// Interpolates the embed stage across its 20..95 progress band.
fn embed_progress(batches_done: usize, total_batches: usize) -> u8 {
    20 + ((batches_done as f64 / total_batches as f64) * 75.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::pdf_with_pages;
    use crate::upload::UploadPipeline;
    use common::progress::ProgressSubscription;
    use common::storage::types::StoredObject;
    use common::utils::config::StorageKind;
    use object_store::memory::InMemory;
    use uuid::Uuid;

    const TEST_DIMENSION: usize = 8;

    struct TestHarness {
        db: Arc<SurrealDbClient>,
        storage: StorageManager,
        broker: ProgressBroker,
        pipeline: ProcessingPipeline,
        uploader: UploadPipeline,
    }

    async fn harness() -> TestHarness {
        let config = AppConfig {
            embedding_backend: "hashed".to_string(),
            embedding_dimensions: TEST_DIMENSION as u32,
            chunk_size: 200,
            chunk_overlap: 20,
            job_timeout_secs: 30,
            ..AppConfig::default()
        };

        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("in-memory surrealdb"),
        );
        db.ensure_initialized(TEST_DIMENSION)
            .await
            .expect("schema init");

        let storage =
            StorageManager::with_backend(Arc::new(InMemory::new()), StorageKind::Memory);
        let broker = ProgressBroker::new(db.clone());
        let embedder = Arc::new(EmbeddingProvider::new_hashed(TEST_DIMENSION));

        let pipeline = ProcessingPipeline::new(
            db.clone(),
            storage.clone(),
            broker.clone(),
            embedder,
            config.clone(),
        );
        let uploader = UploadPipeline::new(db.clone(), storage.clone(), config);

        TestHarness {
            db,
            storage,
            broker,
            pipeline,
            uploader,
        }
    }

    async fn drain_until_done(subscription: &mut ProgressSubscription) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), subscription.next())
                .await
                .expect("event within timeout")
                .expect("stream open")
                .expect("event ok");
            let done = event.done;
            events.push(event);
            if done {
                return events;
            }
        }
    }

    #[tokio::test]
    async fn test_process_success_path() {
        let h = harness().await;
        let content = Bytes::from(pdf_with_pages(&["alpha page", "beta page", "gamma page"]));
        let document = h
            .uploader
            .submit("acme", "handbook.pdf", content, "application/pdf")
            .await
            .expect("upload");
        let storage_key = document.storage_key.clone().expect("key");

        let mut subscription = h.broker.subscribe(&document.id).await.expect("subscribe");

        h.pipeline
            .process(&document.id, "acme", &storage_key)
            .await
            .expect("process");

        let stored = h
            .db
            .get_item::<Document>(&document.id)
            .await
            .expect("fetch")
            .expect("document exists");
        assert_eq!(stored.status, DocumentStatus::Completed);
        assert!(stored.error_message.is_none());

        // Source blob is dropped once indexing finished.
        assert!(!h.storage.exists(&storage_key).await.expect("exists"));

        // Chunks are tagged with tenant, document, and source filename.
        let chunks: Vec<DocumentChunk> = h
            .db
            .client
            .select(DocumentChunk::table_name())
            .await
            .expect("select chunks");
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert_eq!(chunk.company_id, "acme");
            assert_eq!(chunk.document_id, document.id);
            assert_eq!(chunk.source, "handbook.pdf");
        }

        // Progress is monotone and ends with exactly one terminal event.
        let events = drain_until_done(&mut subscription).await;
        let mut last = 0u8;
        for event in &events {
            assert!(event.progress >= last, "progress went backwards: {events:?}");
            last = event.progress;
        }
        let done_events: Vec<_> = events.iter().filter(|e| e.done).collect();
        assert_eq!(done_events.len(), 1);
        assert_eq!(done_events[0].progress, 100);
        assert_eq!(done_events[0].step, ProgressStep::Completed);
        assert_eq!(events.first().map(|e| e.progress), Some(0));
    }

    #[tokio::test]
    async fn test_process_download_failure_marks_failed() {
        let h = harness().await;

        let mut document = Document::new(
            "acme".to_string(),
            "handbook.pdf".to_string(),
            "application/pdf".to_string(),
            1024,
            3,
        );
        let storage_key = format!("documents/acme/{}.pdf", document.id);
        document.storage_key = Some(storage_key.clone());
        h.db.store_item(document.clone()).await.expect("store");
        // No blob uploaded for this key.

        let mut subscription = h.broker.subscribe(&document.id).await.expect("subscribe");

        let result = h.pipeline.process(&document.id, "acme", &storage_key).await;
        assert!(result.is_err());

        let stored = h
            .db
            .get_item::<Document>(&document.id)
            .await
            .expect("fetch")
            .expect("document exists");
        assert_eq!(stored.status, DocumentStatus::Failed);
        assert!(stored
            .error_message
            .as_deref()
            .is_some_and(|m| !m.is_empty()));

        let events = drain_until_done(&mut subscription).await;
        let terminal = events.last().expect("terminal event");
        assert_eq!(terminal.step, ProgressStep::Failed);
        assert_eq!(terminal.progress, 0);
        assert!(terminal.done);
    }

    #[tokio::test]
    async fn test_redelivered_job_is_noop_after_terminal_status() {
        let h = harness().await;
        let content = Bytes::from(pdf_with_pages(&["alpha page"]));
        let document = h
            .uploader
            .submit("acme", "handbook.pdf", content, "application/pdf")
            .await
            .expect("upload");
        let storage_key = document.storage_key.clone().expect("key");

        h.pipeline
            .process(&document.id, "acme", &storage_key)
            .await
            .expect("first attempt");

        let chunks_after_first: Vec<DocumentChunk> = h
            .db
            .client
            .select(DocumentChunk::table_name())
            .await
            .expect("select chunks");

        // At-least-once redelivery of the same payload.
        h.pipeline
            .process(&document.id, "acme", &storage_key)
            .await
            .expect("second attempt");

        let stored = h
            .db
            .get_item::<Document>(&document.id)
            .await
            .expect("fetch")
            .expect("document exists");
        assert_eq!(stored.status, DocumentStatus::Completed);

        let chunks_after_second: Vec<DocumentChunk> = h
            .db
            .client
            .select(DocumentChunk::table_name())
            .await
            .expect("select chunks");
        assert_eq!(chunks_after_first.len(), chunks_after_second.len());
    }

    #[tokio::test]
    async fn test_document_without_text_completes_with_no_chunks() {
        let h = harness().await;
        let content = Bytes::from(pdf_with_pages(&[" "]));
        let document = h
            .uploader
            .submit("acme", "blank.pdf", content, "application/pdf")
            .await
            .expect("upload");
        let storage_key = document.storage_key.clone().expect("key");

        h.pipeline
            .process(&document.id, "acme", &storage_key)
            .await
            .expect("process");

        let stored = h
            .db
            .get_item::<Document>(&document.id)
            .await
            .expect("fetch")
            .expect("document exists");
        assert_eq!(stored.status, DocumentStatus::Completed);

        let chunks: Vec<DocumentChunk> = h
            .db
            .client
            .select(DocumentChunk::table_name())
            .await
            .expect("select chunks");
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn test_process_missing_document_fails() {
        let h = harness().await;

        let result = h
            .pipeline
            .process("ghost-doc", "acme", "documents/acme/ghost-doc.pdf")
            .await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_embed_progress_band() {
        assert_eq!(embed_progress(1, 1), 95);
        assert_eq!(embed_progress(1, 2), 58);
        assert_eq!(embed_progress(2, 2), 95);
        assert_eq!(embed_progress(1, 75), 21);
    }
}
