//! Prometheus metrics plumbing shared by all three binaries.

use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
    routing::get, Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Bind a `TcpListener` on `bind` and serve `router` on it until it fails.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}

/// Install the Prometheus recorder and add a `/metrics` route plus the
/// request-tracking middleware to `router`.
pub fn setup_metrics_routes(router: Router) -> Router {
    let handle = setup_metrics_recorder();

    router
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .layer(axum::middleware::from_fn(track_requests))
}

pub fn setup_metrics_recorder() -> PrometheusHandle {
    // Latency buckets from fast status lookups up to multipart uploads.
    const SECONDS: &[f64] = &[0.005, 0.025, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

    PrometheusBuilder::new()
        .set_buckets(SECONDS)
        .unwrap()
        .install_recorder()
        .unwrap()
}

/// Middleware recording request counts and latency per route and status.
pub async fn track_requests(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = match req.extensions().get::<MatchedPath>() {
        Some(matched) => matched.as_str().to_owned(),
        None => req.uri().path().to_owned(),
    };
    let method = req.method().clone();

    let response = next.run(req).await;

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];

    metrics::counter!("resume_http_requests_total", &labels).increment(1);
    metrics::histogram!("resume_http_request_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());

    response
}
