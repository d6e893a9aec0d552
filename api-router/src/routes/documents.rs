use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::info;

use common::storage::types::{document::Document, document_chunk::DocumentChunk};
use ingestion_pipeline::upload::UploadPipeline;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct CompanyQuery {
    pub company_id: String,
}

#[derive(Debug, TryFromMultipart)]
pub struct UploadParams {
    // The size gate lives in the upload pipeline where it produces a typed
    // 413; the extractor itself stays permissive.
    #[form_data(limit = "unlimited")]
    pub file: FieldData<Bytes>,
}

#[derive(Debug, Serialize)]
pub struct DocumentUploadResponse {
    pub status: &'static str,
    pub document_id: String,
    pub filename: String,
}

#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub document_id: String,
    pub company_id: String,
    pub filename: String,
    pub size_bytes: u64,
    pub num_pages: u32,
    pub content_type: String,
    pub status: String,
    pub error_message: Option<String>,
    pub uploaded_at: String,
}

impl From<Document> for DocumentResponse {
    fn from(document: Document) -> Self {
        Self {
            document_id: document.id,
            company_id: document.company_id,
            filename: document.filename,
            size_bytes: document.size_bytes,
            num_pages: document.num_pages,
            content_type: document.content_type,
            status: document.status.as_str().to_string(),
            error_message: document.error_message,
            uploaded_at: document.uploaded_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DocumentListResponse {
    pub documents: Vec<DocumentResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct DocumentDeleteResponse {
    pub status: &'static str,
    pub document_id: String,
}

/// Upload a PDF: validate, quota-check, store the blob, persist metadata,
/// enqueue vectorization. Errors before persistence leave no side effects.
pub async fn upload_document(
    State(state): State<ApiState>,
    Query(query): Query<CompanyQuery>,
    TypedMultipart(input): TypedMultipart<UploadParams>,
) -> Result<impl IntoResponse, ApiError> {
    let company_id = query.company_id.trim();
    if company_id.is_empty() {
        return Err(ApiError::ValidationError(
            "company_id is required".to_string(),
        ));
    }

    let filename = input
        .file
        .metadata
        .file_name
        .clone()
        .unwrap_or_else(|| "unknown.pdf".to_string());
    let content_type = input.file.metadata.content_type.clone().unwrap_or_default();

    info!(
        company_id = %company_id,
        filename = %filename,
        size_bytes = input.file.contents.len(),
        "received document upload"
    );

    let pipeline = UploadPipeline::new(
        state.db.clone(),
        state.storage.clone(),
        state.config.clone(),
    );
    let document = pipeline
        .submit(company_id, &filename, input.file.contents, &content_type)
        .await?;

    Ok((
        StatusCode::OK,
        Json(DocumentUploadResponse {
            status: "queued",
            document_id: document.id,
            filename: document.filename,
        }),
    ))
}

/// All documents of a company, newest first.
pub async fn list_documents(
    State(state): State<ApiState>,
    Query(query): Query<CompanyQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let company_id = query.company_id.trim();
    if company_id.is_empty() {
        return Err(ApiError::ValidationError(
            "company_id is required".to_string(),
        ));
    }

    let documents = Document::list_for_company(&state.db, company_id).await?;
    let documents: Vec<DocumentResponse> = documents.into_iter().map(Into::into).collect();
    let total = documents.len();

    Ok((StatusCode::OK, Json(DocumentListResponse { documents, total })))
}

/// Remove a document entirely: vector entries, then the blob (if it still
/// exists), then the metadata row. A document id that does not exist or
/// belongs to another company is a 404 either way.
pub async fn delete_document(
    State(state): State<ApiState>,
    Path(document_id): Path<String>,
    Query(query): Query<CompanyQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let document = Document::get_scoped(&state.db, &document_id, &query.company_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Document not found".to_string()))?;

    DocumentChunk::delete_by_document_id(&state.db, &document.id).await?;

    if let Some(storage_key) = &document.storage_key {
        state
            .storage
            .delete(storage_key)
            .await
            .map_err(common::error::AppError::from)?;
    }

    Document::delete_scoped(&state.db, &document_id, &query.company_id).await?;

    info!(document_id = %document_id, company_id = %query.company_id, "document deleted");

    Ok((
        StatusCode::OK,
        Json(DocumentDeleteResponse {
            status: "deleted",
            document_id,
        }),
    ))
}
