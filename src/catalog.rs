//! Runtime catalog client
//!
//! [`ModelCatalog`] is the seam to the shared Foundry Local runtime: catalog
//! listing, downloads, and loading/unloading models into the one running
//! service. [`FoundryLocalCatalog`] talks to the runtime's management REST API;
//! the service URL is either configured or discovered with `foundry service`.

use crate::command::{CommandRunner, CommandSpec};
use crate::config::ManagerConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::RwLock;

static SERVICE_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s/]+").expect("service url regex is valid"));

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)%").expect("progress regex is valid"));

/// Value used for metadata the runtime did not report
pub const UNKNOWN: &str = "unknown";

/// Hardware a model variant targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceType {
    Cpu,
    Gpu,
    Npu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "CPU"),
            Self::Gpu => write!(f, "GPU"),
            Self::Npu => write!(f, "NPU"),
        }
    }
}

impl FromStr for DeviceType {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CPU" => Ok(Self::Cpu),
            "GPU" => Ok(Self::Gpu),
            "NPU" => Ok(Self::Npu),
            other => Err(OrchestratorError::validation(format!(
                "Unknown device type '{}' (expected CPU, GPU or NPU)",
                other
            ))),
        }
    }
}

/// Shared runtime endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// OpenAI-compatible inference endpoint
    pub endpoint: String,
    /// Management service root
    pub service_url: String,
}

impl ServiceInfo {
    pub fn from_service_url(service_url: &str) -> Self {
        let service_url = service_url.trim_end_matches('/').to_string();
        Self {
            endpoint: format!("{}/v1", service_url),
            service_url,
        }
    }
}

/// Model known to the runtime's built-in catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogModel {
    pub id: String,
    pub alias: String,
    pub device_type: String,
    pub execution_provider: String,
    pub model_size: String,
    pub version: String,
}

/// Descriptor of a model resident in the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedModelInfo {
    pub id: String,
    pub alias: String,
    pub version: String,
    pub device_type: String,
    pub execution_provider: String,
    pub model_size: String,
}

impl LoadedModelInfo {
    /// Minimal descriptor for models the runtime gave no metadata for
    pub fn unknown(alias: &str) -> Self {
        Self {
            id: alias.to_string(),
            alias: alias.to_string(),
            version: UNKNOWN.to_string(),
            device_type: UNKNOWN.to_string(),
            execution_provider: UNKNOWN.to_string(),
            model_size: UNKNOWN.to_string(),
        }
    }
}

impl From<&CatalogModel> for LoadedModelInfo {
    fn from(model: &CatalogModel) -> Self {
        Self {
            id: model.id.clone(),
            alias: model.alias.clone(),
            version: model.version.clone(),
            device_type: model.device_type.clone(),
            execution_provider: model.execution_provider.clone(),
            model_size: model.model_size.clone(),
        }
    }
}

/// Download progress callback, receives a percentage in 0..=100
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

// ============================================================================
// Trait Definitions
// ============================================================================

/// Catalog and runtime API of the shared inference service
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    /// Start the shared service, or attach to it if already running
    async fn start_service(&self) -> OrchestratorResult<ServiceInfo>;

    async fn is_service_running(&self) -> OrchestratorResult<bool>;

    async fn list_catalog_models(&self) -> OrchestratorResult<Vec<CatalogModel>>;

    /// Resolve an alias or id to a catalog variant
    async fn get_model_info(
        &self,
        alias_or_id: &str,
        device: Option<DeviceType>,
    ) -> OrchestratorResult<Option<CatalogModel>>;

    async fn download_model(
        &self,
        alias: &str,
        device: Option<DeviceType>,
        token: Option<&str>,
        force: bool,
        on_progress: Option<ProgressFn>,
    ) -> OrchestratorResult<()>;

    /// Fails with [`OrchestratorError::NotDownloaded`] or
    /// [`OrchestratorError::NotFoundInCatalog`] when those apply
    async fn load_model(
        &self,
        alias: &str,
        device: Option<DeviceType>,
        ttl_secs: u64,
    ) -> OrchestratorResult<LoadedModelInfo>;

    async fn unload_model(
        &self,
        alias: &str,
        device: Option<DeviceType>,
        force: bool,
    ) -> OrchestratorResult<()>;

    async fn list_loaded_models(&self) -> OrchestratorResult<Vec<LoadedModelInfo>>;

    /// Cheap inference-API round trip
    async fn probe(&self) -> OrchestratorResult<()>;
}

/// Map a runtime failure message onto the recoverable error kinds
pub fn classify_runtime_error(alias: &str, message: &str) -> OrchestratorError {
    if message.contains("not been downloaded") {
        OrchestratorError::NotDownloaded {
            alias: alias.to_string(),
        }
    } else if message.contains("not found") {
        OrchestratorError::NotFoundInCatalog {
            alias: alias.to_string(),
        }
    } else {
        OrchestratorError::operational(message.to_string())
    }
}

/// Pick the catalog variant for an alias or id
///
/// Exact id matches win; otherwise the first alias match for the requested
/// device (or the first alias match at all when no device is given).
pub fn select_variant(
    models: &[CatalogModel],
    alias_or_id: &str,
    device: Option<DeviceType>,
) -> Option<CatalogModel> {
    if let Some(model) = models
        .iter()
        .find(|m| m.id.eq_ignore_ascii_case(alias_or_id))
    {
        return Some(model.clone());
    }

    let mut candidates = models
        .iter()
        .filter(|m| m.alias.eq_ignore_ascii_case(alias_or_id));

    match device {
        Some(device) => candidates
            .find(|m| m.device_type.eq_ignore_ascii_case(&device.to_string()))
            .cloned(),
        None => candidates.next().cloned(),
    }
}

/// Extract the management URL from `foundry service` output
pub fn parse_service_url(output: &str) -> Option<String> {
    SERVICE_URL_RE
        .find(output)
        .map(|m| m.as_str().to_string())
}

// ============================================================================
// Production Implementation
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct FoundryRuntime {
    device_type: String,
    execution_provider: String,
}

/// Entry of `GET /foundry/list`
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct FoundryListEntry {
    name: String,
    alias: String,
    version: serde_json::Value,
    runtime: FoundryRuntime,
    file_size_mb: Option<u64>,
    uri: String,
    publisher: String,
    provider_type: String,
    prompt_template: serde_json::Value,
}

impl FoundryListEntry {
    fn to_catalog_model(&self) -> CatalogModel {
        let version = match &self.version {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => UNKNOWN.to_string(),
            other => other.to_string(),
        };

        CatalogModel {
            id: self.name.clone(),
            alias: self.alias.clone(),
            device_type: self.runtime.device_type.clone(),
            execution_provider: self.runtime.execution_provider.clone(),
            model_size: self
                .file_size_mb
                .map(|mb| format!("{} MB", mb))
                .unwrap_or_else(|| UNKNOWN.to_string()),
            version,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadResult {
    success: bool,
    #[serde(default)]
    error_message: Option<String>,
}

/// Client for the Foundry Local management API
pub struct FoundryLocalCatalog {
    http: reqwest::Client,
    runner: Arc<dyn CommandRunner>,
    cli_path: String,
    command_timeout: Duration,
    download_timeout: Duration,
    configured_url: Option<String>,
    service_url: RwLock<Option<String>>,
}

impl FoundryLocalCatalog {
    pub fn new(config: &ManagerConfig, runner: Arc<dyn CommandRunner>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            http,
            runner,
            cli_path: config.cli_path.clone(),
            command_timeout: Duration::from_secs(config.command_timeout_secs),
            download_timeout: Duration::from_secs(config.download_timeout_secs),
            configured_url: config
                .service_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
            service_url: RwLock::new(None),
        })
    }

    async fn run_service_command(&self, subcommand: &str) -> OrchestratorResult<String> {
        let spec = CommandSpec::new(
            self.cli_path.clone(),
            ["service", subcommand],
            self.command_timeout,
        );
        let description = spec.to_string();
        let output = self.runner.run(spec).await?.ensure_success(&description)?;
        // Some CLI versions print the URL on stderr
        Ok(format!("{}\n{}", output.stdout, output.stderr))
    }

    /// Find the management URL, starting the service when needed
    async fn discover_service_url(&self) -> OrchestratorResult<String> {
        if let Some(url) = &self.configured_url {
            return Ok(url.clone());
        }

        if let Ok(status) = self.run_service_command("status").await
            && let Some(url) = parse_service_url(&status)
        {
            tracing::debug!(service_url = %url, "Attached to running Foundry Local service");
            return Ok(url);
        }

        tracing::info!("Starting Foundry Local service");
        let started = self.run_service_command("start").await?;
        if let Some(url) = parse_service_url(&started) {
            return Ok(url);
        }

        let status = self.run_service_command("status").await?;
        parse_service_url(&status).ok_or_else(|| {
            OrchestratorError::parse("service status", "no service URL in 'foundry service status' output")
        })
    }

    async fn base_url(&self) -> OrchestratorResult<String> {
        self.service_url.read().await.clone().ok_or_else(|| {
            OrchestratorError::operational("Foundry Local service has not been started")
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> OrchestratorResult<T> {
        let url = format!("{}{}", self.base_url().await?, path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| OrchestratorError::operational(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::operational(format!(
                "GET {} returned {}: {}",
                url,
                status,
                body.trim()
            )));
        }

        response.json::<T>().await.map_err(|e| {
            OrchestratorError::operational(format!("Invalid response from {}: {}", url, e))
        })
    }

    async fn list_entries(&self) -> OrchestratorResult<Vec<FoundryListEntry>> {
        self.get_json("/foundry/list").await
    }

    async fn cached_ids(&self) -> OrchestratorResult<Vec<String>> {
        self.get_json("/openai/models").await
    }

    async fn loaded_ids(&self) -> OrchestratorResult<Vec<String>> {
        self.get_json("/openai/loadedmodels").await
    }

    async fn resolve(
        &self,
        alias: &str,
        device: Option<DeviceType>,
    ) -> OrchestratorResult<CatalogModel> {
        self.get_model_info(alias, device)
            .await?
            .ok_or_else(|| OrchestratorError::NotFoundInCatalog {
                alias: alias.to_string(),
            })
    }
}

fn contains_id(ids: &[String], id: &str) -> bool {
    ids.iter().any(|candidate| candidate.eq_ignore_ascii_case(id))
}

#[async_trait]
impl ModelCatalog for FoundryLocalCatalog {
    async fn start_service(&self) -> OrchestratorResult<ServiceInfo> {
        let url = self.discover_service_url().await?;
        *self.service_url.write().await = Some(url.clone());

        if !self.is_service_running().await? {
            return Err(OrchestratorError::operational(format!(
                "Foundry Local service at {} is not responding",
                url
            )));
        }

        Ok(ServiceInfo::from_service_url(&url))
    }

    async fn is_service_running(&self) -> OrchestratorResult<bool> {
        let Some(base) = self.service_url.read().await.clone() else {
            return Ok(false);
        };

        match self.http.get(format!("{}/openai/status", base)).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                tracing::debug!(error = %e, "Service status request failed");
                Ok(false)
            }
        }
    }

    async fn list_catalog_models(&self) -> OrchestratorResult<Vec<CatalogModel>> {
        Ok(self
            .list_entries()
            .await?
            .iter()
            .map(FoundryListEntry::to_catalog_model)
            .collect())
    }

    async fn get_model_info(
        &self,
        alias_or_id: &str,
        device: Option<DeviceType>,
    ) -> OrchestratorResult<Option<CatalogModel>> {
        let models = self.list_catalog_models().await?;
        Ok(select_variant(&models, alias_or_id, device))
    }

    async fn download_model(
        &self,
        alias: &str,
        device: Option<DeviceType>,
        token: Option<&str>,
        force: bool,
        on_progress: Option<ProgressFn>,
    ) -> OrchestratorResult<()> {
        let entries = self.list_entries().await?;
        let models: Vec<_> = entries.iter().map(FoundryListEntry::to_catalog_model).collect();
        let model = select_variant(&models, alias, device).ok_or_else(|| {
            OrchestratorError::NotFoundInCatalog {
                alias: alias.to_string(),
            }
        })?;

        if !force && contains_id(&self.cached_ids().await?, &model.id) {
            tracing::info!(model_id = %model.id, "Model already downloaded");
            return Ok(());
        }

        let Some(entry) = entries.iter().find(|e| e.name == model.id) else {
            return Err(OrchestratorError::NotFoundInCatalog {
                alias: alias.to_string(),
            });
        };

        let provider_type = if entry.provider_type == "AzureFoundry" {
            "AzureFoundryLocal".to_string()
        } else {
            entry.provider_type.clone()
        };

        let body = serde_json::json!({
            "model": {
                "Name": entry.name,
                "Uri": entry.uri,
                "Publisher": entry.publisher,
                "ProviderType": provider_type,
                "PromptTemplate": entry.prompt_template,
            },
            "token": token.unwrap_or_default(),
            "IgnorePipeReport": true,
        });

        let url = format!("{}/openai/download", self.base_url().await?);
        let mut response = self
            .http
            .post(&url)
            .timeout(self.download_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| OrchestratorError::operational(format!("POST {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::operational(format!(
                "Download of {} returned {}: {}",
                model.id,
                status,
                text.trim()
            )));
        }

        // Progress lines are streamed before the final JSON result
        let mut transcript = String::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| OrchestratorError::operational(format!("Download stream failed: {}", e)))?
        {
            let text = String::from_utf8_lossy(&chunk);
            if let Some(callback) = &on_progress
                && let Some(percent) = PERCENT_RE
                    .captures_iter(&text)
                    .filter_map(|c| c[1].parse::<f64>().ok())
                    .last()
            {
                callback(percent.min(100.0));
            }
            transcript.push_str(&text);
        }

        let result = transcript
            .rfind('{')
            .and_then(|start| serde_json::from_str::<DownloadResult>(&transcript[start..]).ok())
            .ok_or_else(|| OrchestratorError::parse("download result", "no JSON result in response"))?;

        if !result.success {
            return Err(OrchestratorError::operational(format!(
                "Failed to download {}: {}",
                model.id,
                result.error_message.unwrap_or_else(|| "unknown error".to_string())
            )));
        }

        if let Some(callback) = &on_progress {
            callback(100.0);
        }

        Ok(())
    }

    async fn load_model(
        &self,
        alias: &str,
        device: Option<DeviceType>,
        ttl_secs: u64,
    ) -> OrchestratorResult<LoadedModelInfo> {
        let model = self.resolve(alias, device).await?;

        if !contains_id(&self.cached_ids().await?, &model.id) {
            return Err(OrchestratorError::NotDownloaded {
                alias: alias.to_string(),
            });
        }

        let url = format!(
            "{}/openai/load/{}",
            self.base_url().await?,
            urlencoding::encode(&model.id)
        );
        let response = self
            .http
            .get(&url)
            .query(&[("ttl", ttl_secs.to_string())])
            .timeout(self.download_timeout)
            .send()
            .await
            .map_err(|e| OrchestratorError::operational(format!("GET {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_runtime_error(alias, text.trim()));
        }

        Ok(LoadedModelInfo::from(&model))
    }

    async fn unload_model(
        &self,
        alias: &str,
        device: Option<DeviceType>,
        force: bool,
    ) -> OrchestratorResult<()> {
        // Custom models are not in the catalog; the runtime knows them by alias
        let id = match self.get_model_info(alias, device).await? {
            Some(model) => model.id,
            None => alias.to_string(),
        };

        if !contains_id(&self.loaded_ids().await?, &id) {
            tracing::warn!(model_id = %id, "Model is not loaded, nothing to unload");
            return Ok(());
        }

        let url = format!(
            "{}/openai/unload/{}",
            self.base_url().await?,
            urlencoding::encode(&id)
        );
        let response = self
            .http
            .get(&url)
            .query(&[("force", force.to_string())])
            .send()
            .await
            .map_err(|e| OrchestratorError::operational(format!("GET {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::operational(format!(
                "Unload of {} returned {}: {}",
                id,
                status,
                text.trim()
            )));
        }

        Ok(())
    }

    async fn list_loaded_models(&self) -> OrchestratorResult<Vec<LoadedModelInfo>> {
        let ids = self.loaded_ids().await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        // Catalog metadata is a nicety here; loaded ids alone are enough
        let catalog = self.list_catalog_models().await.unwrap_or_default();

        Ok(ids
            .iter()
            .map(|id| {
                catalog
                    .iter()
                    .find(|m| m.id.eq_ignore_ascii_case(id))
                    .map(LoadedModelInfo::from)
                    .unwrap_or_else(|| LoadedModelInfo::unknown(id))
            })
            .collect())
    }

    async fn probe(&self) -> OrchestratorResult<()> {
        let _: serde_json::Value = self.get_json("/v1/models").await?;
        Ok(())
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================
