//! Consume queued resume jobs and extract their text.

use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use envconfig::Envconfig;
use tokio::signal::unix::SignalKind;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use resume_common::blob::S3BlobStore;
use resume_common::extract::PdfExtractor;
use resume_common::health::HealthRegistry;
use resume_common::metrics::{serve, setup_metrics_routes};
use resume_common::queue::RedisJobQueue;
use resume_common::store::PgJobStore;
use resume_worker::config::Config;
use resume_worker::executor::JobExecutor;
use resume_worker::pool::WorkerPool;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("invalid configuration:");

    let liveness = HealthRegistry::new("liveness");
    let consumer_liveness = liveness.register("consumer", Duration::from_secs(60));

    let store = Arc::new(
        PgJobStore::new(&config.database_url, config.max_pg_connections)
            .await
            .expect("failed to connect to the job store"),
    );
    let queue = Arc::new(
        RedisJobQueue::new(&config.queue_url, config.queue_password())
            .expect("failed to create the queue client"),
    );
    let blobs = Arc::new(S3BlobStore::new(config.blob_settings()).await);

    let executor = Arc::new(JobExecutor::new(
        store,
        blobs,
        Arc::new(PdfExtractor),
        config.job_timeout(),
    ));

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())));
    let router = setup_metrics_routes(router);
    let bind = config.bind();
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    });

    let shutdown = CancellationToken::new();
    let pool = WorkerPool::new(queue, executor, config.worker_count, consumer_liveness);
    let pool_task = tokio::spawn(pool.run(shutdown.clone()));

    wait_for_shutdown_signal().await;
    info!("shutting down; draining workers");
    shutdown.cancel();

    if let Err(error) = pool_task.await {
        error!("worker pool task panicked: {}", error);
    }
    info!("all workers drained; exiting");
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())
        .expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
}

pub async fn index() -> &'static str {
    "resume worker"
}
