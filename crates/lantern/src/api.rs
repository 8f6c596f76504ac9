//! HTTP API: probes, Prometheus metrics, cluster snapshot and the event feed

use crate::ws::ws_handler;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use lantern_lib::{
    ClusterApi, ClusterSnapshot, ComponentStatus, FetchError, HealthRegistry, Hub,
    StructuredLogger,
};
use prometheus::{Encoder, TextEncoder};
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "lantern";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub hub: Hub,
    pub cluster: Arc<dyn ClusterApi>,
    pub logger: StructuredLogger,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        hub: Hub,
        cluster: Arc<dyn ClusterApi>,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            health_registry,
            hub,
            cluster,
            logger,
        }
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still serving, possibly stale
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Frontend liveness check; independent of component health
async fn api_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": SERVICE_NAME,
    }))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

fn snapshot_error(e: FetchError) -> Response {
    warn!(error = %e, "Failed to fetch cluster snapshot");
    (
        StatusCode::BAD_GATEWAY,
        Json(serde_json::json!({ "error": e.to_string() })),
    )
        .into_response()
}

/// Laid-out nodes, each with the IDs of its pods
async fn nodes(State(state): State<Arc<AppState>>) -> Response {
    match ClusterSnapshot::fetch(state.cluster.as_ref()).await {
        Ok(snapshot) => Json(snapshot.nodes).into_response(),
        Err(e) => snapshot_error(e),
    }
}

/// Laid-out pods across all namespaces
async fn pods(State(state): State<Arc<AppState>>) -> Response {
    match ClusterSnapshot::fetch(state.cluster.as_ref()).await {
        Ok(snapshot) => Json(snapshot.pods).into_response(),
        Err(e) => snapshot_error(e),
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/health", get(api_health))
        .route("/api/nodes", get(nodes))
        .route("/api/pods", get(pods))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Serve the API until `shutdown` resolves
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
