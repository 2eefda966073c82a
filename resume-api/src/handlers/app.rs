use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{routing, Router};

use resume_common::blob::BlobStore;
use resume_common::queue::JobQueue;
use resume_common::store::JobStore;

use super::resumes;

/// Collaborators the handlers need, injected so tests can swap in mocks.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn JobQueue>,
    pub blobs: Arc<dyn BlobStore>,
}

pub fn add_routes(router: Router<AppState>, state: AppState) -> Router {
    router
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(index))
        .route("/resumes", routing::post(resumes::post))
        .route("/resumes/:id", routing::get(resumes::get_status))
        // Leave headroom over the document cap for multipart framing.
        .layer(DefaultBodyLimit::max(resumes::MAX_DOCUMENT_SIZE + 64 * 1024))
        .with_state(state)
}

pub async fn index() -> &'static str {
    "resume api"
}
