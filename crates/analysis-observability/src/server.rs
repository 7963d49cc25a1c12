//! The `/metrics` HTTP endpoint (spec §6), served on [`MetricsConfig::bind_addr`].

use crate::error::{Error, Result};
use crate::metrics::ServiceMetrics;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

fn build_router(metrics: Arc<ServiceMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(metrics)
}

/// Binds `bind_addr` and serves `/metrics` and `/healthz` until `shutdown` is
/// cancelled.
pub async fn serve(bind_addr: SocketAddr, metrics: Arc<ServiceMetrics>, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(bind_addr).await.map_err(Error::Bind)?;
    tracing::info!(%bind_addr, "metrics server listening");
    let router = build_router(metrics);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(Error::Serve)
}

async fn metrics_handler(State(metrics): State<Arc<ServiceMetrics>>) -> Response {
    match metrics.encode() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn healthz() -> Response {
    (StatusCode::OK, "ok").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn metrics_endpoint_returns_200_with_worker_gauges() {
        let metrics = Arc::new(ServiceMetrics::new().unwrap());
        metrics.worker_count.set(4);
        metrics.active_workers.set(1);

        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = TcpListener::bind(addr).await.unwrap();
        let bound = listener.local_addr().unwrap();
        let router = build_router(Arc::clone(&metrics));
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown_clone.cancelled().await })
                .await
                .unwrap();
        });

        let client = reqwest::Client::new();
        let response = timeout(Duration::from_secs(2), client.get(format!("http://{bound}/metrics")).send())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.status(), 200);
        let body = response.text().await.unwrap();
        assert!(body.contains("active_workers 1"));
        assert!(body.contains("worker_count 4"));

        shutdown.cancel();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn healthz_endpoint_returns_200() {
        let metrics = Arc::new(ServiceMetrics::new().unwrap());
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = TcpListener::bind(addr).await.unwrap();
        let bound = listener.local_addr().unwrap();
        let router = build_router(metrics);
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown_clone.cancelled().await })
                .await
                .unwrap();
        });

        let client = reqwest::Client::new();
        let response = timeout(Duration::from_secs(2), client.get(format!("http://{bound}/healthz")).send())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.status(), 200);

        shutdown.cancel();
        server.await.unwrap();
    }
}
