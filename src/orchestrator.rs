//! Model lifecycle orchestration
//!
//! The [`Orchestrator`] maps logical model ids onto the single shared runtime.
//! It owns the in-memory set of loaded models, drives the load state machine
//! (direct load, download-and-retry, CLI fallback for cache-only models) and is
//! the only writer of lifecycle fields in the [`ModelStore`].

use crate::cache::{CacheManager, CacheModelRecord};
use crate::catalog::{
    CatalogModel, DeviceType, LoadedModelInfo, ModelCatalog, ProgressFn, ServiceInfo,
};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::metrics::{self, LoadPath};
use crate::store::{ModelRecord, ModelSource, ModelStatus, ModelStore};
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Offered when the catalog cannot be listed at all
pub const FALLBACK_MODELS: &[&str] = &[
    "phi-3.5-mini",
    "phi-4-mini",
    "qwen2.5-0.5b",
    "llama-3.2-1b",
    "llama-3.2-3b",
];

/// Entry of the merged catalog + cache listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableModel {
    pub id: String,
    pub alias: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_size: Option<String>,
    pub source: ModelSource,
    pub is_custom: bool,
}

impl From<&CatalogModel> for AvailableModel {
    fn from(model: &CatalogModel) -> Self {
        Self {
            id: model.id.clone(),
            alias: model.alias.clone(),
            description: model.alias.clone(),
            version: Some(model.version.clone()),
            device_type: Some(model.device_type.clone()),
            execution_provider: Some(model.execution_provider.clone()),
            model_size: Some(model.model_size.clone()),
            source: ModelSource::Catalog,
            is_custom: false,
        }
    }
}

impl From<&CacheModelRecord> for AvailableModel {
    fn from(model: &CacheModelRecord) -> Self {
        Self {
            id: model.id.clone(),
            alias: model.alias.clone(),
            description: model.description.clone(),
            version: None,
            device_type: None,
            execution_provider: None,
            model_size: None,
            source: ModelSource::Cache,
            is_custom: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelHealthStatus {
    Healthy,
    NotLoaded,
    Error,
}

/// Liveness of a single model in the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelHealth {
    pub model: String,
    pub status: ModelHealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    NotInitialized,
    Stopped,
    Error,
    Running,
}

/// Health of the shared runtime service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: ServiceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub loaded_models: usize,
}

/// Outcome of one heartbeat reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeartbeatSummary {
    pub alive: usize,
    /// Logical ids the runtime no longer reports
    pub expired: Vec<String>,
}

/// Central coordinator for the shared runtime
pub struct Orchestrator {
    catalog: Arc<dyn ModelCatalog>,
    cache: Arc<CacheManager>,
    store: Arc<dyn ModelStore>,
    service: OnceCell<ServiceInfo>,
    loaded: DashMap<String, LoadedModelInfo>,
    default_ttl_secs: u64,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<dyn ModelCatalog>,
        cache: Arc<CacheManager>,
        store: Arc<dyn ModelStore>,
        default_ttl_secs: u64,
    ) -> Self {
        Self {
            catalog,
            cache,
            store,
            service: OnceCell::new(),
            loaded: DashMap::new(),
            default_ttl_secs,
        }
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn ModelStore> {
        &self.store
    }

    pub fn default_ttl(&self) -> u64 {
        self.default_ttl_secs
    }

    /// Start or attach to the shared runtime
    ///
    /// Concurrent callers share one start. A failed start leaves the
    /// orchestrator uninitialized so the next call tries again.
    pub async fn initialize(&self) -> OrchestratorResult<ServiceInfo> {
        let info = self
            .service
            .get_or_try_init(|| async {
                tracing::info!("Initializing Foundry Local service");
                let info = self.catalog.start_service().await?;
                tracing::info!(
                    endpoint = %info.endpoint,
                    service_url = %info.service_url,
                    "Foundry Local service ready"
                );
                Ok::<_, OrchestratorError>(info)
            })
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Failed to initialize Foundry Local service"))?;

        Ok(info.clone())
    }

    pub fn is_initialized(&self) -> bool {
        self.service.initialized()
    }

    /// Inference endpoint of the shared runtime, once initialized
    pub fn endpoint(&self) -> Option<String> {
        self.service.get().map(|info| info.endpoint.clone())
    }

    pub fn loaded_model_info(&self, logical_id: &str) -> Option<LoadedModelInfo> {
        self.loaded.get(logical_id).map(|entry| entry.value().clone())
    }

    /// In-memory snapshot keyed by logical id
    pub fn all_loaded_models(&self) -> BTreeMap<String, LoadedModelInfo> {
        self.loaded
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    // ------------------------------------------------------------------------
    // Listings
    // ------------------------------------------------------------------------

    /// Catalog models plus cache-only custom models
    pub async fn list_available_models(&self) -> Vec<AvailableModel> {
        let cache_models = self.cache.list_cache_models().await;

        let catalog = match self.initialize().await {
            Ok(_) => self.catalog.list_catalog_models().await,
            Err(e) => Err(e),
        };

        match catalog {
            Ok(catalog) => merge_catalog_and_cache(&catalog, &cache_models),
            Err(e) => {
                tracing::warn!(error = %e, "Catalog unavailable, using fallback model list");
                let mut models = fallback_models();
                append_custom_models(&mut models, &cache_models);
                models
            }
        }
    }

    /// Live view from the runtime, or the in-memory snapshot if it is unreachable
    pub async fn list_loaded_models(&self) -> Vec<LoadedModelInfo> {
        let live = match self.initialize().await {
            Ok(_) => self.catalog.list_loaded_models().await,
            Err(e) => Err(e),
        };

        match live {
            Ok(models) => models,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to query loaded models, using in-memory state");
                self.all_loaded_models().into_values().collect()
            }
        }
    }

    pub async fn get_model_info(&self, alias_or_id: &str) -> OrchestratorResult<CatalogModel> {
        self.initialize().await?;

        self.catalog
            .get_model_info(alias_or_id, None)
            .await?
            .ok_or_else(|| OrchestratorError::NotFoundInCatalog {
                alias: alias_or_id.to_string(),
            })
    }

    pub async fn download_model(
        &self,
        alias: &str,
        device: Option<DeviceType>,
        on_progress: Option<ProgressFn>,
    ) -> OrchestratorResult<()> {
        self.initialize().await?;

        tracing::info!(alias = %alias, device = ?device, "Downloading model");
        self.catalog
            .download_model(alias, device, None, false, on_progress)
            .await
            .inspect_err(|e| tracing::error!(alias = %alias, error = %e, "Model download failed"))?;
        tracing::info!(alias = %alias, "Model downloaded");

        Ok(())
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    pub async fn register_model(&self, record: ModelRecord) -> OrchestratorResult<ModelRecord> {
        if self.store.get_model(&record.id).await?.is_some() {
            return Err(OrchestratorError::validation(format!(
                "Model '{}' is already registered",
                record.id
            )));
        }

        self.store.save_model(record.clone()).await?;
        tracing::info!(model_id = %record.id, alias = %record.alias, "Model registered");
        Ok(record)
    }

    pub async fn get_registered_model(&self, logical_id: &str) -> OrchestratorResult<ModelRecord> {
        self.store
            .get_model(logical_id)
            .await?
            .ok_or_else(|| OrchestratorError::ModelNotFound {
                id: logical_id.to_string(),
            })
    }

    /// Remove a registration, unloading the model first if it is resident
    pub async fn delete_model(&self, logical_id: &str) -> OrchestratorResult<()> {
        let record = self.get_registered_model(logical_id).await?;

        if let Some(info) = self.loaded_model_info(logical_id)
            && let Err(e) = self.unload_model(logical_id, &info.id, None, true).await
        {
            tracing::warn!(model_id = %logical_id, error = %e, "Unload before delete failed");
        }

        self.store.delete_model(&record.id).await?;
        tracing::info!(model_id = %logical_id, "Model registration deleted");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Load / unload
    // ------------------------------------------------------------------------

    /// Bring a registered model into service on the shared runtime
    pub async fn load_model(
        &self,
        logical_id: &str,
        alias: &str,
        device: Option<DeviceType>,
        ttl_secs: u64,
    ) -> OrchestratorResult<ModelRecord> {
        let mut record = self.get_registered_model(logical_id).await?;

        tracing::info!(model_id = %logical_id, alias = %alias, device = ?device, ttl = ttl_secs, "Loading model");

        match self.load_on_runtime(&mut record, alias, device, ttl_secs).await {
            Ok((endpoint, info, path)) => {
                let now = Utc::now();
                record.status = ModelStatus::Running;
                record.endpoint = Some(endpoint);
                record.runtime_id = Some(info.id.clone());
                record.runtime_alias = Some(info.alias.clone());
                record.version = Some(info.version.clone());
                record.device_type = Some(info.device_type.clone());
                record.execution_provider = Some(info.execution_provider.clone());
                record.model_size = Some(info.model_size.clone());
                record.last_error = None;
                record.last_heartbeat = Some(now);
                record.updated_at = now;
                if path == LoadPath::Cli {
                    record = record.with_source(ModelSource::Cache, true);
                }

                self.store.save_model(record.clone()).await?;
                self.loaded.insert(logical_id.to_string(), info);

                metrics::record_model_loaded(logical_id, path);
                metrics::update_loaded_count(self.loaded.len());
                tracing::info!(model_id = %logical_id, path = ?path, "Model running");

                Ok(record)
            }
            Err(e) => {
                tracing::error!(model_id = %logical_id, alias = %alias, error = %e, "Model load failed");

                let now = Utc::now();
                record.status = ModelStatus::Error;
                record.endpoint = None;
                record.last_error = Some(e.to_string());
                record.last_heartbeat = Some(now);
                record.updated_at = now;

                if let Err(persist_err) = self.store.save_model(record).await {
                    tracing::error!(model_id = %logical_id, error = %persist_err, "Failed to persist error status");
                }
                metrics::record_load_failure(logical_id);

                Err(e)
            }
        }
    }

    /// Runs the load state machine; returns the endpoint and runtime descriptor
    async fn load_on_runtime(
        &self,
        record: &mut ModelRecord,
        alias: &str,
        device: Option<DeviceType>,
        ttl_secs: u64,
    ) -> OrchestratorResult<(String, LoadedModelInfo, LoadPath)> {
        let endpoint = self.initialize().await?.endpoint;

        match self.catalog.load_model(alias, device, ttl_secs).await {
            Ok(info) => Ok((endpoint, info, LoadPath::Catalog)),
            Err(OrchestratorError::NotDownloaded { .. }) => {
                tracing::info!(model_id = %record.id, alias = %alias, "Model not downloaded yet");

                record.status = ModelStatus::Downloading;
                record.last_error = None;
                record.updated_at = Utc::now();
                self.store.save_model(record.clone()).await?;

                self.download_model(alias, device, None).await?;
                let info = self.catalog.load_model(alias, device, ttl_secs).await?;
                Ok((endpoint, info, LoadPath::Download))
            }
            Err(OrchestratorError::NotFoundInCatalog { .. }) => {
                tracing::info!(model_id = %record.id, alias = %alias, "Alias not in catalog, trying cache via CLI");

                self.cache.load_model_via_cli(alias, ttl_secs).await?;
                Ok((endpoint, LoadedModelInfo::unknown(alias), LoadPath::Cli))
            }
            Err(e) => Err(e),
        }
    }

    /// Take a model out of service
    ///
    /// The record is marked stopped even when the runtime call fails; that
    /// failure is still returned.
    pub async fn unload_model(
        &self,
        logical_id: &str,
        alias: &str,
        device: Option<DeviceType>,
        force: bool,
    ) -> OrchestratorResult<()> {
        tracing::info!(model_id = %logical_id, alias = %alias, force = force, "Unloading model");

        let result = match self.initialize().await {
            Ok(_) => self.catalog.unload_model(alias, device, force).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            tracing::error!(model_id = %logical_id, error = %e, "Runtime unload failed");
        }

        self.loaded.remove(logical_id);
        metrics::update_loaded_count(self.loaded.len());

        self.mark_stopped(logical_id).await?;
        result?;

        metrics::record_model_unloaded(logical_id);
        tracing::info!(model_id = %logical_id, "Model unloaded");
        Ok(())
    }

    async fn mark_stopped(&self, logical_id: &str) -> OrchestratorResult<()> {
        let Some(mut record) = self.store.get_model(logical_id).await? else {
            tracing::warn!(model_id = %logical_id, "No registration to mark stopped");
            return Ok(());
        };

        let now = Utc::now();
        record.status = ModelStatus::Stopped;
        record.endpoint = None;
        record.last_heartbeat = Some(now);
        record.updated_at = now;
        self.store.save_model(record).await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------------

    /// Whether the runtime currently reports the model as loaded
    pub async fn check_model_health(&self, alias_or_id: &str) -> ModelHealth {
        let live = match self.initialize().await {
            Ok(_) => self.catalog.list_loaded_models().await,
            Err(e) => Err(e),
        };

        match live {
            Ok(models) => {
                let loaded = models.iter().any(|m| {
                    m.id.eq_ignore_ascii_case(alias_or_id) || m.alias.eq_ignore_ascii_case(alias_or_id)
                });
                ModelHealth {
                    model: alias_or_id.to_string(),
                    status: if loaded {
                        ModelHealthStatus::Healthy
                    } else {
                        ModelHealthStatus::NotLoaded
                    },
                    message: None,
                }
            }
            Err(e) => ModelHealth {
                model: alias_or_id.to_string(),
                status: ModelHealthStatus::Error,
                message: Some(e.to_string()),
            },
        }
    }

    pub async fn check_service_health(&self) -> ServiceHealth {
        let loaded_models = self.loaded.len();
        let Some(info) = self.service.get() else {
            return ServiceHealth {
                status: ServiceStatus::NotInitialized,
                endpoint: None,
                message: None,
                loaded_models,
            };
        };

        let (status, message) = match self.catalog.is_service_running().await {
            Err(e) => (ServiceStatus::Error, Some(e.to_string())),
            Ok(false) => (ServiceStatus::Stopped, None),
            Ok(true) => match self.catalog.probe().await {
                Ok(()) => (ServiceStatus::Running, None),
                Err(e) => (
                    ServiceStatus::Error,
                    Some(format!("Service running but not responding: {}", e)),
                ),
            },
        };

        ServiceHealth {
            status,
            endpoint: Some(info.endpoint.clone()),
            message,
            loaded_models,
        }
    }

    /// Reconcile in-memory models with what the runtime still holds
    ///
    /// Models the runtime dropped (TTL expiry) are removed and marked stopped.
    pub async fn sync_heartbeats(&self) -> OrchestratorResult<HeartbeatSummary> {
        let tracked = self.all_loaded_models();
        if tracked.is_empty() {
            return Ok(HeartbeatSummary::default());
        }

        let live = self.catalog.list_loaded_models().await?;
        let mut summary = HeartbeatSummary::default();

        for (logical_id, info) in tracked {
            let alive = live.iter().any(|m| {
                m.id.eq_ignore_ascii_case(&info.id) || m.alias.eq_ignore_ascii_case(&info.alias)
            });

            if alive {
                summary.alive += 1;
                if let Some(mut record) = self.store.get_model(&logical_id).await? {
                    record.last_heartbeat = Some(Utc::now());
                    self.store.save_model(record).await?;
                }
            } else {
                tracing::info!(model_id = %logical_id, "Model no longer loaded in runtime");
                self.loaded.remove(&logical_id);
                self.mark_stopped(&logical_id).await?;
                summary.expired.push(logical_id);
            }
        }

        metrics::update_loaded_count(self.loaded.len());
        Ok(summary)
    }

    /// Force-unload every model the runtime reports as loaded
    ///
    /// Live entries are mapped back to logical ids where possible; entries
    /// with no registration behind them are still unloaded. Best effort.
    pub async fn cleanup(&self) {
        let live = self.list_loaded_models().await;
        tracing::info!(count = live.len(), "Unloading all models");

        for model in live {
            let logical_id = self.loaded.iter().find_map(|entry| {
                let info = entry.value();
                let matches = info.id.eq_ignore_ascii_case(&model.id)
                    || info.alias.eq_ignore_ascii_case(&model.alias);
                matches.then(|| entry.key().clone())
            });

            let result = match &logical_id {
                Some(logical_id) => self.unload_model(logical_id, &model.id, None, true).await,
                None => self.catalog.unload_model(&model.id, None, true).await,
            };
            if let Err(e) = result {
                tracing::warn!(
                    model_id = ?logical_id,
                    runtime_id = %model.id,
                    error = %e,
                    "Failed to unload model during cleanup"
                );
            }
        }

        // Tracked models the runtime had already dropped
        for logical_id in self.all_loaded_models().into_keys() {
            self.loaded.remove(&logical_id);
            if let Err(e) = self.mark_stopped(&logical_id).await {
                tracing::warn!(model_id = %logical_id, error = %e, "Failed to mark model stopped");
            }
        }

        metrics::update_loaded_count(0);
    }
}

/// Merge the catalog with models found in the cache directory
///
/// A cache entry is custom iff neither its id nor its alias matches any catalog
/// id or alias; matching entries are already represented by the catalog.
pub fn merge_catalog_and_cache(
    catalog: &[CatalogModel],
    cache: &[CacheModelRecord],
) -> Vec<AvailableModel> {
    let mut models: Vec<AvailableModel> = catalog.iter().map(AvailableModel::from).collect();
    append_custom_models(&mut models, cache);
    models
}

fn append_custom_models(models: &mut Vec<AvailableModel>, cache: &[CacheModelRecord]) {
    let mut known: HashSet<String> = models
        .iter()
        .flat_map(|m| [m.id.to_lowercase(), m.alias.to_lowercase()])
        .collect();

    for entry in cache {
        let id = entry.id.to_lowercase();
        let alias = entry.alias.to_lowercase();
        if known.contains(&id) || known.contains(&alias) {
            continue;
        }
        known.insert(id);
        known.insert(alias);
        models.push(AvailableModel::from(entry));
    }
}

fn fallback_models() -> Vec<AvailableModel> {
    FALLBACK_MODELS
        .iter()
        .map(|alias| AvailableModel {
            id: alias.to_string(),
            alias: alias.to_string(),
            description: alias.to_string(),
            version: None,
            device_type: None,
            execution_provider: None,
            model_size: None,
            source: ModelSource::Catalog,
            is_custom: false,
        })
        .collect()
}
