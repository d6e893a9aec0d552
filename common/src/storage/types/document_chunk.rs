use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(DocumentChunk, "document_chunk", {
    document_id: String,
    company_id: String,
    source: String,
    page_number: u32,
    chunk_index: u32,
    text: String,
    embedding: Vec<f32>
});

impl DocumentChunk {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        document_id: String,
        company_id: String,
        source: String,
        page_number: u32,
        chunk_index: u32,
        text: String,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            document_id,
            company_id,
            source,
            page_number,
            chunk_index,
            text,
            embedding,
        }
    }

    /// Index one batch of chunks in a single call. This is the vector
    /// index's add-documents operation and the processing pipeline's unit of
    /// failure: the whole batch lands or the whole call errors.
    pub async fn insert_batch(
        db: &SurrealDbClient,
        chunks: Vec<DocumentChunk>,
    ) -> Result<(), AppError> {
        if chunks.is_empty() {
            return Ok(());
        }

        const INSERT_QUERY: &str = r#"
            INSERT INTO document_chunk $chunks
        "#;

        db.client
            .query(INSERT_QUERY)
            .bind(("chunks", chunks))
            .await?
            .check()?;

        Ok(())
    }

    /// Remove every chunk of a document from the index.
    pub async fn delete_by_document_id(
        db: &SurrealDbClient,
        document_id: &str,
    ) -> Result<(), AppError> {
        const DELETE_QUERY: &str = r#"
            DELETE type::table($table)
            WHERE document_id = $document_id
        "#;

        db.client
            .query(DELETE_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("document_id", document_id.to_string()))
            .await?
            .check()?;

        Ok(())
    }

    /// Tenant-filtered KNN search over the chunk embeddings.
    ///
    /// Requires the HNSW index from `build_indexes` with a dimension matching
    /// the query vector.
    pub async fn search_for_company(
        db: &SurrealDbClient,
        embedding: Vec<f32>,
        company_id: &str,
        take: u8,
    ) -> Result<Vec<DocumentChunk>, AppError> {
        let knn_query = format!(
            "SELECT *, vector::distance::knn() AS distance FROM {} \
             WHERE company_id = $company_id AND embedding <|{take},40|> $embedding \
             ORDER BY distance",
            Self::table_name()
        );

        let chunks: Vec<DocumentChunk> = db
            .client
            .query(knn_query)
            .bind(("company_id", company_id.to_string()))
            .bind(("embedding", embedding))
            .await?
            .take(0)?;

        Ok(chunks)
    }
}
