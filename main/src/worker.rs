use std::sync::Arc;

use common::{
    progress::ProgressBroker,
    storage::{db::SurrealDbClient, store::StorageManager},
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use ingestion_pipeline::{run_worker_loop, ProcessingPipeline};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

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

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let embedding_provider = Arc::new(EmbeddingProvider::from_config(
        &config,
        Some(openai_client),
    )?);
    info!(
        embedding_backend = %embedding_provider.backend_label(),
        embedding_dimension = embedding_provider.dimension(),
        "Embedding provider initialized"
    );

    // Create global storage manager
    let storage = StorageManager::new(&config).await?;

    let broker = ProgressBroker::new(db.clone());

    let pipeline = Arc::new(ProcessingPipeline::new(
        db.clone(),
        storage,
        broker,
        embedding_provider,
        config.clone(),
    ));

    info!(concurrency = config.worker_concurrency, "Starting worker");
    run_worker_loop(db, pipeline, config.worker_concurrency).await?;

    Ok(())
}
