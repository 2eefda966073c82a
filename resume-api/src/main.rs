//! Accept resume uploads and expose job status.

use std::sync::Arc;

use axum::Router;
use config::Config;
use envconfig::Envconfig;

use resume_common::blob::S3BlobStore;
use resume_common::metrics::{serve, setup_metrics_routes};
use resume_common::queue::RedisJobQueue;
use resume_common::store::PgJobStore;

mod config;
mod handlers;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("invalid configuration:");

    let store = PgJobStore::new(&config.database_url, config.max_pg_connections)
        .await
        .expect("failed to connect to the job store");
    let queue = RedisJobQueue::new(&config.queue_url, config.queue_password())
        .expect("failed to create the queue client");
    let blobs = S3BlobStore::new(config.blob_settings()).await;

    let state = handlers::AppState {
        store: Arc::new(store),
        queue: Arc::new(queue),
        blobs: Arc::new(blobs),
    };

    let app = handlers::add_routes(Router::new(), state);
    let app = setup_metrics_routes(app);

    match serve(app, &config.bind()).await {
        Ok(_) => {}
        Err(e) => tracing::error!("failed to start resume-api http server, {}", e),
    }
}
