//! API request and response models

use crate::catalog::{DeviceType, LoadedModelInfo};
use crate::store::ModelRecord;
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Request to register a model
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateModelRequest {
    /// Logical id used in every other route
    pub id: String,
    /// Alias handed to the runtime (catalog alias or cache-only alias)
    pub alias: String,

    /// Display name, defaults to the id
    #[serde(default)]
    pub name: Option<String>,

    /// Backing model identifier, defaults to the alias
    #[serde(default)]
    pub model: Option<String>,
}

impl CreateModelRequest {
    pub fn into_record(self) -> ModelRecord {
        let name = self.name.unwrap_or_else(|| self.id.clone());
        let model = self.model.unwrap_or_else(|| self.alias.clone());
        ModelRecord::new(self.id, name, self.alias, model)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LoadModelRequest {
    #[serde(default)]
    pub device: Option<DeviceType>,
    /// Falls back to the configured default TTL
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UnloadModelRequest {
    #[serde(default)]
    pub device: Option<DeviceType>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DownloadModelRequest {
    #[serde(default)]
    pub device: Option<DeviceType>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SwitchCacheRequest {
    /// Directory to switch to, or `"default"`
    pub path: String,
}

/// Registered model together with its runtime descriptor, if loaded
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelDetails {
    #[serde(flatten)]
    pub record: ModelRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded: Option<LoadedModelInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CliStatusResponse {
    pub available: bool,
    pub cli_path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadResponse {
    pub alias: String,
    pub downloaded: bool,
}
