//! HTTP surface of the operator: probes, Prometheus metrics and the live
//! capacity snapshot new APIs are admitted against

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use operator_lib::capacity::CapacitySnapshotter;
use operator_lib::{ComponentStatus, HealthRegistry, OperatorMetrics};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: OperatorMetrics,
    snapshotter: OnceLock<CapacitySnapshotter>,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, metrics: OperatorMetrics) -> Self {
        Self {
            health_registry,
            metrics,
            snapshotter: OnceLock::new(),
        }
    }

    /// Serve `/capacity` from now on; later calls are ignored
    pub fn attach_snapshotter(&self, snapshotter: CapacitySnapshotter) {
        if self.snapshotter.set(snapshotter).is_err() {
            warn!("Capacity snapshotter already attached");
        }
    }
}

fn probe_status(ok: bool) -> StatusCode {
    if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Degraded crons keep the operator live; only an unhealthy one fails the probe
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;
    let status = probe_status(health.status != ComponentStatus::Unhealthy);
    (status, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;
    (probe_status(readiness.ready), Json(readiness))
}

async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

async fn capacity(State(state): State<Arc<AppState>>) -> Response {
    let Some(snapshotter) = state.snapshotter.get() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "cluster client not yet initialized" })),
        )
            .into_response();
    };

    match snapshotter.snapshot().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => {
            warn!(error = %e, "Capacity snapshot failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/capacity", get(capacity))
        .with_state(state)
}

pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Operator API listening");

    axum::serve(listener, create_router(state)).await?;
    Ok(())
}
