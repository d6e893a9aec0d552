use std::sync::Arc;

use common::{
    progress::ProgressBroker,
    storage::{db::SurrealDbClient, store::StorageManager},
    utils::config::AppConfig,
};

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub storage: StorageManager,
    pub broker: ProgressBroker,
}

impl ApiState {
    pub async fn new(
        config: &AppConfig,
        storage: StorageManager,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let db = Arc::new(
            SurrealDbClient::new(
                &config.surrealdb_address,
                &config.surrealdb_username,
                &config.surrealdb_password,
                &config.surrealdb_namespace,
                &config.surrealdb_database,
            )
            .await?,
        );

        db.ensure_initialized(config.embedding_dimensions as usize)
            .await?;

        Ok(Self::with_resources(db, config.clone(), storage))
    }

    /// Assemble the state from already-constructed dependencies. Used by the
    /// combined binary and by tests that inject in-memory backends.
    pub fn with_resources(
        db: Arc<SurrealDbClient>,
        config: AppConfig,
        storage: StorageManager,
    ) -> Self {
        let broker = ProgressBroker::new(db.clone());
        Self {
            db,
            config,
            storage,
            broker,
        }
    }
}
