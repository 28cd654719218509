//! API request handlers

use super::models::{BackendLoad, HealthResponse, LoadsResponse};
use super::routes::AppState;
use axum::{Json, extract::State, http::StatusCode};

/// GET /health - Balancer health check
pub async fn health() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now(),
        }),
    )
}

/// GET /metrics - Prometheus metrics
pub async fn metrics(State(state): State<AppState>) -> String {
    state.prometheus_handle.render()
}

/// GET /loads - Per-backend load estimates
///
/// Values are as of the last selection; decay since then is not applied.
pub async fn loads(State(state): State<AppState>) -> Json<LoadsResponse> {
    let snapshot = state.loads.borrow().clone();

    let backends = state
        .endpoints
        .iter()
        .map(|endpoint| BackendLoad {
            id: endpoint.id.0,
            endpoint: endpoint.to_string(),
            load: snapshot.loads.get(endpoint.id.0).copied().unwrap_or(0.0),
        })
        .collect();

    Json(LoadsResponse {
        backends,
        selections: snapshot.selections,
        updated_at: snapshot.updated_at,
    })
}
