//! Return stale in-flight queue entries to the pending list.

use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use cleanup::InflightSweeper;
use config::Config;
use envconfig::Envconfig;
use eyre::Result;
use tracing::error;

use resume_common::health::{HealthHandle, HealthRegistry};
use resume_common::metrics::setup_metrics_routes;
use resume_common::queue::RedisJobQueue;
use resume_common::store::PgJobStore;

mod cleanup;
mod config;

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, app).await?;

    Ok(())
}

async fn cleanup_loop(sweeper: InflightSweeper, interval_secs: u64, liveness: HealthHandle) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;
        liveness.report_healthy();
        sweeper.sweep().await;
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("invalid configuration:");

    let liveness = HealthRegistry::new("liveness");
    let sweeper_liveness = liveness.register(
        "sweeper",
        Duration::from_secs(config.interval_seconds * 4),
    );

    let store = PgJobStore::new(&config.database_url, config.max_pg_connections)
        .await
        .expect("failed to connect to the job store");
    let queue = RedisJobQueue::new(&config.queue_url, config.queue_password())
        .expect("failed to create the queue client");

    let sweeper = InflightSweeper::new(
        Arc::new(store),
        Arc::new(queue),
        config.inflight_timeout(),
    );

    let app = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())));
    let app = setup_metrics_routes(app);

    tokio::select! {
        result = listen(app, config.bind()) => {
            if let Err(e) = result {
                error!("resume-janitor http server failed, {}", e);
            }
        }
        _ = cleanup_loop(sweeper, config.interval_seconds, sweeper_liveness) => {
            error!("resume-janitor cleanup loop exited");
        }
    }
}

pub async fn index() -> &'static str {
    "resume janitor"
}
