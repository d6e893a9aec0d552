use api_router::{api_routes_v1, api_state::ApiState};
use axum::{extract::FromRef, Router};
use common::{
    progress::ProgressBroker,
    storage::{db::SurrealDbClient, store::StorageManager},
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use ingestion_pipeline::{run_worker_loop, ProcessingPipeline};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
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

    // HTTP state shares the primary connection; the worker gets its own so
    // a busy pipeline cannot starve request handling.
    let api_state = ApiState::with_resources(db, config.clone(), storage.clone());

    let app = Router::new()
        .nest("/api/v1", api_routes_v1(&api_state))
        .with_state(AppState { api_state });

    let worker_config = config.clone();
    let worker_storage = storage.clone();
    let worker_embedder = embedding_provider.clone();
    tokio::spawn(async move {
        let worker_db = match SurrealDbClient::new(
            &worker_config.surrealdb_address,
            &worker_config.surrealdb_username,
            &worker_config.surrealdb_password,
            &worker_config.surrealdb_namespace,
            &worker_config.surrealdb_database,
        )
        .await
        {
            Ok(db) => Arc::new(db),
            Err(e) => {
                error!("Worker database connection failed: {}", e);
                return;
            }
        };

        let broker = ProgressBroker::new(worker_db.clone());
        let pipeline = Arc::new(ProcessingPipeline::new(
            worker_db.clone(),
            worker_storage,
            broker,
            worker_embedder,
            worker_config.clone(),
        ));

        info!("Starting embedded worker");
        if let Err(e) = run_worker_loop(worker_db, pipeline, worker_config.worker_concurrency).await
        {
            error!("Worker loop error: {}", e);
        }
    });

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Clone, FromRef)]
struct AppState {
    api_state: ApiState,
}
