use std::sync::Arc;

use bytes::Bytes;
use tracing::info;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::{document_storage_key, StorageManager},
        types::{document::Document, vectorize_job::VectorizeJob},
    },
    utils::{config::AppConfig, upload_limits::validate_upload},
};

use crate::utils::pdf;

/// Server-side half of the ingestion pipeline: validate, quota-check,
/// persist, enqueue. Each step is a hard precondition for the next; a
/// rejection leaves no trace in the database, the blob store, or the queue.
pub struct UploadPipeline {
    db: Arc<SurrealDbClient>,
    storage: StorageManager,
    config: AppConfig,
}

impl UploadPipeline {
    pub fn new(db: Arc<SurrealDbClient>, storage: StorageManager, config: AppConfig) -> Self {
        Self {
            db,
            storage,
            config,
        }
    }

    pub async fn submit(
        &self,
        company_id: &str,
        filename: &str,
        content: Bytes,
        content_type: &str,
    ) -> Result<Document, AppError> {
        // 1. Type and size checks, before touching any collaborator.
        validate_upload(&self.config, content_type, content.len())?;

        // 2. Page count, the unit the tenant quota is expressed in.
        let num_pages = pdf::count_pages(content.clone()).await?;

        // 3. Quota. Read-then-compare; concurrent uploads for one company
        // can both pass the check. There is no per-tenant lock here.
        let current_total = Document::total_pages_for_company(&self.db, company_id).await?;
        let max = self.config.max_pages_per_company;
        if current_total + u64::from(num_pages) > u64::from(max) {
            return Err(AppError::PageLimitExceeded {
                current_total,
                incoming: num_pages,
                max,
            });
        }

        // 4. Blob before row: a storage failure must not leave a Document
        // behind that points at nothing.
        let mut document = Document::new(
            company_id.to_string(),
            filename.to_string(),
            content_type.to_string(),
            content.len() as u64,
            num_pages,
        );
        let storage_key = document_storage_key(company_id, &document.id);
        self.storage.put(&storage_key, content).await?;
        document.storage_key = Some(storage_key);

        // 5. Persist the metadata with status queued.
        self.db.store_item(document.clone()).await?;

        // 6. Hand off to the worker. If this fails the queued row stays
        // behind as an orphan; it is surfaced to the caller and reconciled
        // out-of-band, never silently retried here.
        VectorizeJob::enqueue(&self.db, &document).await?;

        info!(
            document_id = %document.id,
            company_id = %company_id,
            filename = %filename,
            num_pages,
            "document uploaded and queued for vectorization"
        );

        Ok(document)
    }
}
