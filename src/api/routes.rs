//! API route definitions

use crate::orchestrator::Orchestrator;
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
}

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health and status
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        // Shared runtime
        .route("/service/init", post(handlers::init_service))
        .route("/service/health", get(handlers::service_health))
        .route("/service/cleanup", post(handlers::cleanup_service))
        // Listings (static segments take precedence over /models/{id})
        .route("/models/available", get(handlers::list_available_models))
        .route("/models/loaded", get(handlers::list_loaded_models))
        // Registrations
        .route(
            "/models",
            get(handlers::list_models).post(handlers::create_model),
        )
        .route(
            "/models/{id}",
            get(handlers::get_model).delete(handlers::delete_model),
        )
        // Model lifecycle
        .route("/models/{id}/load", post(handlers::load_model))
        .route("/models/{id}/unload", post(handlers::unload_model))
        .route("/models/{id}/health", get(handlers::model_health))
        // Catalog
        .route("/catalog/{alias}", get(handlers::catalog_model))
        .route("/catalog/{alias}/download", post(handlers::download_model))
        // Cache directory
        .route("/cache/location", get(handlers::cache_location))
        .route("/cache/switch", post(handlers::switch_cache))
        .route("/cache/models", get(handlers::cache_models))
        .route("/cache/cli", get(handlers::cli_status))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}
