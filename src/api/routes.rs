//! API route definitions

use crate::backend::BackendEndpoint;
use crate::load::LoadSnapshot;
use axum::{Router, routing::get};
use std::sync::Arc;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::handlers;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub endpoints: Arc<[BackendEndpoint]>,
    pub loads: watch::Receiver<LoadSnapshot>,
    pub prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
}

/// Create the admin router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/loads", get(handlers::loads))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}
