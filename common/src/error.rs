use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] object_store::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Unsupported file type: {0}. Only PDF is accepted.")]
    InvalidFileType(String),
    #[error("File too large ({size_bytes} bytes). Max: {max_bytes} bytes")]
    FileTooLarge { size_bytes: usize, max_bytes: usize },
    #[error(
        "Page limit exceeded: {current_total} page(s) already indexed, incoming document has {incoming}, maximum is {max}"
    )]
    PageLimitExceeded {
        current_total: u64,
        incoming: u32,
        max: u32,
    },
    #[error("Processing error: {0}")]
    Processing(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}
