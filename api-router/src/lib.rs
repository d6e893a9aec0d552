#![allow(clippy::missing_docs_in_private_items)]

use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    routing::{delete, get, post},
    Router,
};
use routes::{
    documents::{delete_document, list_documents, upload_document},
    liveness::live,
    progress::document_progress,
    readiness::ready,
};

pub mod api_state;
pub mod error;
mod routes;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Public, unauthenticated endpoints (for k8s/systemd probes)
    let public = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    // Slack above the configured upload cap so oversized files reach the
    // typed FileTooLarge rejection instead of a bare extractor error.
    let body_limit = app_state.config.max_upload_size_bytes.saturating_mul(2);

    let documents = Router::new()
        .route(
            "/documents/upload",
            post(upload_document).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/documents", get(list_documents))
        .route("/documents/{document_id}", delete(delete_document))
        .route("/documents/progress/{document_id}", get(document_progress));

    public.merge(documents)
}
