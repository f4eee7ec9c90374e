//! API request handlers

use super::models::{
    CliStatusResponse, CreateModelRequest, DownloadModelRequest, DownloadResponse, HealthResponse,
    LoadModelRequest, ModelDetails, SwitchCacheRequest, UnloadModelRequest,
};
use super::routes::AppState;
use crate::cache::{CacheLocation, CacheModelRecord, CacheSwitchResult};
use crate::catalog::{CatalogModel, LoadedModelInfo, ProgressFn, ServiceInfo};
use crate::error::OrchestratorError;
use crate::orchestrator::{AvailableModel, ModelHealth, ServiceHealth};
use crate::store::ModelRecord;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// GET /health - Orchestrator health check
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

// ============================================================================
// Service
// ============================================================================

/// POST /service/init - Start or attach to the shared runtime
pub async fn init_service(
    State(state): State<AppState>,
) -> Result<Json<ServiceInfo>, OrchestratorError> {
    Ok(Json(state.orchestrator.initialize().await?))
}

/// GET /service/health
pub async fn service_health(State(state): State<AppState>) -> Json<ServiceHealth> {
    Json(state.orchestrator.check_service_health().await)
}

/// POST /service/cleanup - Unload every model the runtime reports as loaded
pub async fn cleanup_service(State(state): State<AppState>) -> StatusCode {
    state.orchestrator.cleanup().await;
    StatusCode::NO_CONTENT
}

// ============================================================================
// Registered models
// ============================================================================

/// GET /models - List registered models
pub async fn list_models(
    State(state): State<AppState>,
) -> Result<Json<Vec<ModelRecord>>, OrchestratorError> {
    let models = state.orchestrator.store().list_models().await?;
    Ok(Json(models))
}

/// POST /models - Register a model
pub async fn create_model(
    State(state): State<AppState>,
    Json(req): Json<CreateModelRequest>,
) -> Result<(StatusCode, Json<ModelRecord>), OrchestratorError> {
    if req.id.trim().is_empty() || req.alias.trim().is_empty() {
        return Err(OrchestratorError::validation("Model id and alias are required"));
    }

    let record = state.orchestrator.register_model(req.into_record()).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /models/{id} - Registered model with its runtime descriptor
pub async fn get_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ModelDetails>, OrchestratorError> {
    let record = state.orchestrator.get_registered_model(&id).await?;
    let loaded = state.orchestrator.loaded_model_info(&id);
    Ok(Json(ModelDetails { record, loaded }))
}

/// DELETE /models/{id}
pub async fn delete_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, OrchestratorError> {
    state.orchestrator.delete_model(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /models/available - Catalog merged with cache-only models
pub async fn list_available_models(State(state): State<AppState>) -> Json<Vec<AvailableModel>> {
    Json(state.orchestrator.list_available_models().await)
}

/// GET /models/loaded - Models resident in the runtime
pub async fn list_loaded_models(State(state): State<AppState>) -> Json<Vec<LoadedModelInfo>> {
    let models = state.orchestrator.list_loaded_models().await;
    Json(models)
}

/// POST /models/{id}/load
pub async fn load_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<LoadModelRequest>,
) -> Result<Json<ModelRecord>, OrchestratorError> {
    let record = state.orchestrator.get_registered_model(&id).await?;
    let ttl = req
        .ttl_secs
        .unwrap_or_else(|| state.orchestrator.default_ttl());

    let record = state
        .orchestrator
        .load_model(&id, &record.alias, req.device, ttl)
        .await?;

    Ok(Json(record))
}

/// POST /models/{id}/unload
pub async fn unload_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UnloadModelRequest>,
) -> Result<Json<ModelRecord>, OrchestratorError> {
    let record = state.orchestrator.get_registered_model(&id).await?;

    // Prefer the exact runtime id when this process loaded the model
    let target = state
        .orchestrator
        .loaded_model_info(&id)
        .map(|info| info.id)
        .unwrap_or(record.alias);

    state
        .orchestrator
        .unload_model(&id, &target, req.device, req.force)
        .await?;

    Ok(Json(state.orchestrator.get_registered_model(&id).await?))
}

/// GET /models/{id}/health
pub async fn model_health(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ModelHealth>, OrchestratorError> {
    let record = state.orchestrator.get_registered_model(&id).await?;
    let target = record.runtime_id.unwrap_or(record.alias);
    Ok(Json(state.orchestrator.check_model_health(&target).await))
}

// ============================================================================
// Catalog
// ============================================================================

/// GET /catalog/{alias}
pub async fn catalog_model(
    State(state): State<AppState>,
    Path(alias): Path<String>,
) -> Result<Json<CatalogModel>, OrchestratorError> {
    Ok(Json(state.orchestrator.get_model_info(&alias).await?))
}

/// POST /catalog/{alias}/download - Blocks until the download finishes
pub async fn download_model(
    State(state): State<AppState>,
    Path(alias): Path<String>,
    Json(req): Json<DownloadModelRequest>,
) -> Result<Json<DownloadResponse>, OrchestratorError> {
    let progress_alias = alias.clone();
    let last_logged = Arc::new(AtomicU64::new(0));
    let on_progress: ProgressFn = Arc::new(move |percent: f64| {
        // Log every 10%
        let bucket = (percent / 10.0).floor() as u64;
        if last_logged.fetch_max(bucket, Ordering::Relaxed) < bucket {
            tracing::info!(alias = %progress_alias, percent = percent, "Download progress");
        }
    });

    state
        .orchestrator
        .download_model(&alias, req.device, Some(on_progress))
        .await?;

    Ok(Json(DownloadResponse {
        alias,
        downloaded: true,
    }))
}

// ============================================================================
// Cache
// ============================================================================

/// GET /cache/location
pub async fn cache_location(
    State(state): State<AppState>,
) -> Result<Json<CacheLocation>, OrchestratorError> {
    Ok(Json(state.orchestrator.cache().location().await?))
}

/// POST /cache/switch
pub async fn switch_cache(
    State(state): State<AppState>,
    Json(req): Json<SwitchCacheRequest>,
) -> Result<Json<CacheSwitchResult>, OrchestratorError> {
    Ok(Json(state.orchestrator.cache().switch_cache(&req.path).await?))
}

/// GET /cache/models
pub async fn cache_models(State(state): State<AppState>) -> Json<Vec<CacheModelRecord>> {
    Json(state.orchestrator.cache().list_cache_models().await)
}

/// GET /cache/cli - Whether the Foundry CLI can be found
pub async fn cli_status(State(state): State<AppState>) -> Json<CliStatusResponse> {
    let cache = state.orchestrator.cache();
    Json(CliStatusResponse {
        available: cache.check_cli_available().await,
        cli_path: cache.cli_path().to_string(),
    })
}
