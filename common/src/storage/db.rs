use crate::error::AppError;

use super::types::StoredObject;
use std::ops::Deref;
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    /// Connect, sign in, and select the configured namespace/database.
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        db.signin(Root { username, password }).await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// One-time schema setup. Idempotent, run by every process at startup.
    pub async fn ensure_initialized(&self, embedding_dimensions: usize) -> Result<(), AppError> {
        self.build_indexes(embedding_dimensions).await?;
        Ok(())
    }

    /// Index definitions for document listing, queue claims, and chunk KNN.
    ///
    /// The HNSW index dimension must match the configured embedding provider;
    /// the `<|k,ef|>` operator refuses vectors of any other length.
    pub async fn build_indexes(&self, embedding_dimensions: usize) -> Result<(), Error> {
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_document_company ON document FIELDS company_id")
            .await?
            .check()?;
        self.client
            .query(
                "DEFINE INDEX IF NOT EXISTS idx_document_uploaded ON document FIELDS uploaded_at",
            )
            .await?
            .check()?;

        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_job_state ON vectorize_job FIELDS state")
            .await?
            .check()?;
        self.client
            .query(
                "DEFINE INDEX IF NOT EXISTS idx_job_scheduled ON vectorize_job FIELDS scheduled_at",
            )
            .await?
            .check()?;

        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_chunk_document ON document_chunk FIELDS document_id")
            .await?
            .check()?;
        self.client
            .query(format!(
                "DEFINE INDEX IF NOT EXISTS idx_chunk_embedding ON document_chunk FIELDS embedding HNSW DIMENSION {embedding_dimensions}"
            ))
            .await?
            .check()?;

        Ok(())
    }

    /// Operation to store a object in SurrealDB, requires the struct to implement StoredObject
    ///
    /// # Arguments
    /// * `item` - The item to be stored
    ///
    /// # Returns
    /// * `Result` - Item or Error
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    /// Operation to retrieve a single object by its ID, requires the struct to implement StoredObject
    ///
    /// # Arguments
    /// * `id` - The ID of the item to retrieve
    ///
    /// # Returns
    /// * `Result<Option<T>, Error>` - The found item or Error
    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    /// Operation to delete a single object by its ID, requires the struct to implement StoredObject
    ///
    /// # Arguments
    /// * `id` - The ID of the item to delete
    ///
    /// # Returns
    /// * `Result<Option<T>, Error>` - The deleted item or Error
    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.delete((T::table_name(), id)).await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}
