use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Lifecycle of a document: set to `Queued` by the upload path, every later
/// transition is owned by the processing pipeline. `Completed` and `Failed`
/// are terminal.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Queued,
    Vectorizing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Queued => "queued",
            DocumentStatus::Vectorizing => "vectorizing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Failed)
    }
}

stored_object!(Document, "document", {
    company_id: String,
    filename: String,
    content_type: String,
    size_bytes: u64,
    num_pages: u32,
    status: DocumentStatus,
    error_message: Option<String>,
    storage_key: Option<String>,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    uploaded_at: chrono::DateTime<chrono::Utc>
});

impl Document {
    /// A freshly validated document, queued for processing. The storage key
    /// is attached once the blob upload has succeeded; the row is only ever
    /// persisted with the key already in place.
    pub fn new(
        company_id: String,
        filename: String,
        content_type: String,
        size_bytes: u64,
        num_pages: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            company_id,
            filename,
            content_type,
            size_bytes,
            num_pages,
            status: DocumentStatus::Queued,
            error_message: None,
            storage_key: None,
            uploaded_at: chrono::Utc::now(),
        }
    }

    /// Tenant-scoped fetch. A document id belonging to another company is
    /// indistinguishable from a missing one.
    pub async fn get_scoped(
        db: &SurrealDbClient,
        document_id: &str,
        company_id: &str,
    ) -> Result<Option<Document>, AppError> {
        const GET_QUERY: &str = r#"
            SELECT * FROM type::thing($table, $id)
            WHERE company_id = $company_id
        "#;

        let mut result = db
            .client
            .query(GET_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", document_id.to_string()))
            .bind(("company_id", company_id.to_string()))
            .await?;

        let documents: Vec<Document> = result.take(0)?;
        Ok(documents.into_iter().next())
    }

    /// All documents of a company, newest upload first.
    pub async fn list_for_company(
        db: &SurrealDbClient,
        company_id: &str,
    ) -> Result<Vec<Document>, AppError> {
        const LIST_QUERY: &str = r#"
            SELECT * FROM type::table($table)
            WHERE company_id = $company_id
            ORDER BY uploaded_at DESC
        "#;

        let documents: Vec<Document> = db
            .client
            .query(LIST_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("company_id", company_id.to_string()))
            .await?
            .take(0)?;

        Ok(documents)
    }

    /// Total indexed pages for a company, the quantity bounded by the
    /// per-tenant page quota. Counts every non-deleted document regardless of
    /// status, so quota is reserved from the moment of upload.
    pub async fn total_pages_for_company(
        db: &SurrealDbClient,
        company_id: &str,
    ) -> Result<u64, AppError> {
        const SUM_QUERY: &str = r#"
            SELECT math::sum(num_pages) AS total FROM type::table($table)
            WHERE company_id = $company_id
            GROUP ALL
        "#;

        #[derive(serde::Deserialize)]
        struct TotalRow {
            total: u64,
        }

        let mut result = db
            .client
            .query(SUM_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("company_id", company_id.to_string()))
            .await?;

        let row: Option<TotalRow> = result.take(0)?;
        Ok(row.map_or(0, |r| r.total))
    }

    /// Status write, idempotent. `error_message` is only ever stored together
    /// with `Failed`; any other status clears it.
    pub async fn update_status(
        db: &SurrealDbClient,
        document_id: &str,
        status: DocumentStatus,
        error_message: Option<String>,
    ) -> Result<(), AppError> {
        let error_message = match status {
            DocumentStatus::Failed => error_message,
            _ => None,
        };

        const UPDATE_STATUS_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET status = $status, error_message = $error_message
        "#;

        db.client
            .query(UPDATE_STATUS_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", document_id.to_string()))
            .bind(("status", status))
            .bind(("error_message", error_message))
            .await?
            .check()?;

        tracing::debug!(%document_id, status = status.as_str(), "document status updated");
        Ok(())
    }

    /// Tenant-scoped row removal. Returns whether a row was actually deleted.
    pub async fn delete_scoped(
        db: &SurrealDbClient,
        document_id: &str,
        company_id: &str,
    ) -> Result<bool, AppError> {
        const DELETE_QUERY: &str = r#"
            DELETE type::thing($table, $id)
            WHERE company_id = $company_id
            RETURN BEFORE
        "#;

        let mut result = db
            .client
            .query(DELETE_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", document_id.to_string()))
            .bind(("company_id", company_id.to_string()))
            .await?;

        let deleted: Vec<Document> = result.take(0)?;
        Ok(!deleted.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn memory_db() -> SurrealDbClient {
        let namespace = "test_ns";
        let database = Uuid::new_v4().to_string();
        SurrealDbClient::memory(namespace, &database)
            .await
            .expect("in-memory surrealdb")
    }

    fn sample_document(company_id: &str, num_pages: u32) -> Document {
        let mut document = Document::new(
            company_id.to_string(),
            "handbook.pdf".to_string(),
            "application/pdf".to_string(),
            2048,
            num_pages,
        );
        document.storage_key = Some(format!("documents/{company_id}/{}.pdf", document.id));
        document
    }

    #[tokio::test]
    async fn test_new_document_defaults() {
        let document = sample_document("acme", 3);

        assert_eq!(document.status, DocumentStatus::Queued);
        assert!(document.error_message.is_none());
        assert!(document.storage_key.is_some());
        assert_eq!(document.num_pages, 3);
        assert!(!document.id.is_empty());
    }

    #[tokio::test]
    async fn test_get_scoped_enforces_tenant() {
        let db = memory_db().await;
        let document = sample_document("acme", 3);
        db.store_item(document.clone()).await.expect("store");

        let found = Document::get_scoped(&db, &document.id, "acme")
            .await
            .expect("query");
        assert_eq!(found.as_ref().map(|d| d.id.clone()), Some(document.id.clone()));

        let wrong_tenant = Document::get_scoped(&db, &document.id, "globex")
            .await
            .expect("query");
        assert!(wrong_tenant.is_none());
    }

    #[tokio::test]
    async fn test_list_for_company_newest_first() {
        let db = memory_db().await;

        let mut older = sample_document("acme", 1);
        older.uploaded_at = chrono::Utc::now() - Duration::minutes(5);
        let newer = sample_document("acme", 2);
        let other_tenant = sample_document("globex", 4);

        db.store_item(older.clone()).await.expect("store");
        db.store_item(newer.clone()).await.expect("store");
        db.store_item(other_tenant).await.expect("store");

        let listed = Document::list_for_company(&db, "acme").await.expect("list");

        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].id, older.id);
    }

    #[tokio::test]
    async fn test_total_pages_sums_per_tenant() {
        let db = memory_db().await;

        db.store_item(sample_document("acme", 3)).await.expect("store");
        db.store_item(sample_document("acme", 6)).await.expect("store");
        db.store_item(sample_document("globex", 9))
            .await
            .expect("store");

        let total = Document::total_pages_for_company(&db, "acme")
            .await
            .expect("sum");
        assert_eq!(total, 9);

        let empty = Document::total_pages_for_company(&db, "initech")
            .await
            .expect("sum");
        assert_eq!(empty, 0);
    }

    #[tokio::test]
    async fn test_update_status_failed_records_error() {
        let db = memory_db().await;
        let document = sample_document("acme", 3);
        db.store_item(document.clone()).await.expect("store");

        Document::update_status(
            &db,
            &document.id,
            DocumentStatus::Failed,
            Some("blob missing".to_string()),
        )
        .await
        .expect("update");

        let stored = db
            .get_item::<Document>(&document.id)
            .await
            .expect("fetch")
            .expect("exists");
        assert_eq!(stored.status, DocumentStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("blob missing"));
    }

    #[tokio::test]
    async fn test_update_status_clears_error_outside_failed() {
        let db = memory_db().await;
        let mut document = sample_document("acme", 3);
        document.status = DocumentStatus::Failed;
        document.error_message = Some("first attempt failed".to_string());
        db.store_item(document.clone()).await.expect("store");

        Document::update_status(&db, &document.id, DocumentStatus::Vectorizing, None)
            .await
            .expect("update");

        let stored = db
            .get_item::<Document>(&document.id)
            .await
            .expect("fetch")
            .expect("exists");
        assert_eq!(stored.status, DocumentStatus::Vectorizing);
        assert!(stored.error_message.is_none());
    }

    #[tokio::test]
    async fn test_update_status_is_idempotent() {
        let db = memory_db().await;
        let document = sample_document("acme", 3);
        db.store_item(document.clone()).await.expect("store");

        Document::update_status(&db, &document.id, DocumentStatus::Completed, None)
            .await
            .expect("update");
        Document::update_status(&db, &document.id, DocumentStatus::Completed, None)
            .await
            .expect("second update");

        let stored = db
            .get_item::<Document>(&document.id)
            .await
            .expect("fetch")
            .expect("exists");
        assert_eq!(stored.status, DocumentStatus::Completed);
    }

    #[tokio::test]
    async fn test_delete_scoped_enforces_tenant() {
        let db = memory_db().await;
        let document = sample_document("acme", 3);
        db.store_item(document.clone()).await.expect("store");

        let wrong = Document::delete_scoped(&db, &document.id, "globex")
            .await
            .expect("delete");
        assert!(!wrong);

        let right = Document::delete_scoped(&db, &document.id, "acme")
            .await
            .expect("delete");
        assert!(right);

        let gone = db.get_item::<Document>(&document.id).await.expect("fetch");
        assert!(gone.is_none());
    }
}
