//! Persisted model records
//!
//! Registered models are kept in a TOML file that is rewritten atomically on
//! every change. The orchestrator is the only writer of lifecycle fields
//! (status, endpoint, runtime metadata, errors, heartbeats).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

// ============================================================================
// Record Types
// ============================================================================

/// Lifecycle status of a registered model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Stopped,
    Downloading,
    Running,
    Error,
}

impl std::fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Downloading => write!(f, "downloading"),
            Self::Running => write!(f, "running"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Where a model was discovered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSource {
    #[default]
    Catalog,
    Cache,
}

/// Durable descriptor of a registered model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Logical id used by the rest of the system
    pub id: String,
    pub name: String,
    /// Alias handed to the runtime
    pub alias: String,
    /// Backing model identifier
    pub model: String,
    pub status: ModelStatus,

    /// Set iff status is running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_size: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,

    #[serde(default)]
    pub source: ModelSource,
    #[serde(default)]
    pub is_custom: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ModelRecord {
    /// New registration in the stopped state
    pub fn new(id: String, name: String, alias: String, model: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            alias,
            model,
            status: ModelStatus::Stopped,
            endpoint: None,
            runtime_id: None,
            runtime_alias: None,
            version: None,
            device_type: None,
            execution_provider: None,
            model_size: None,
            last_error: None,
            last_heartbeat: None,
            source: ModelSource::Catalog,
            is_custom: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_source(mut self, source: ModelSource, is_custom: bool) -> Self {
        self.source = source;
        self.is_custom = is_custom;
        self
    }
}

// ============================================================================
// Trait Definitions
// ============================================================================

/// Trait for storage backend operations
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Save content to a file path atomically
    async fn save(&self, path: &Path, content: &str) -> Result<()>;

    /// Load content from a file path
    /// Returns None if file doesn't exist
    async fn load(&self, path: &Path) -> Result<Option<String>>;
}

/// Durable record of configured models
#[async_trait]
pub trait ModelStore: Send + Sync {
    async fn get_model(&self, id: &str) -> Result<Option<ModelRecord>>;

    /// Insert or replace a record
    async fn save_model(&self, record: ModelRecord) -> Result<()>;

    /// All records sorted by id
    async fn list_models(&self) -> Result<Vec<ModelRecord>>;

    /// Returns false when no record existed
    async fn delete_model(&self, id: &str) -> Result<bool>;
}

// ============================================================================
// Production Implementation
// ============================================================================

/// Production storage backend using tokio::fs
pub struct FileSystemStorage;

impl FileSystemStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FileSystemStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for FileSystemStorage {
    async fn save(&self, path: &Path, content: &str) -> Result<()> {
        // Atomic write: write to temp file, then rename
        let temp_file = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_file)
            .await
            .context("Failed to create temp store file")?;
        file.write_all(content.as_bytes())
            .await
            .context("Failed to write store file")?;
        file.sync_all().await.context("Failed to sync store file")?;

        fs::rename(&temp_file, path)
            .await
            .context("Failed to rename temp store file")?;

        Ok(())
    }

    async fn load(&self, path: &Path) -> Result<Option<String>> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            return Ok(None);
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read store file: {:?}", path))?;

        Ok(Some(content))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SavedModels {
    pub last_updated: DateTime<Utc>,
    pub models: Vec<ModelRecord>,
}

/// TOML-file model store; the whole file is rewritten on every change
pub struct TomlModelStore {
    store_file: PathBuf,
    storage: Arc<dyn StorageBackend>,
    records: RwLock<BTreeMap<String, ModelRecord>>,
}

impl TomlModelStore {
    /// Open a store with a custom storage backend
    ///
    /// FAILS HARD if the store file is corrupted - user must fix or delete
    pub async fn open_with_storage(
        store_file: PathBuf,
        storage: Arc<dyn StorageBackend>,
    ) -> Result<Self> {
        let saved = match storage.load(&store_file).await? {
            Some(content) => toml::from_str::<SavedModels>(&content).with_context(|| {
                format!(
                    "Failed to parse store file: {:?}. File may be corrupted. \
                    Please delete or fix the file manually.",
                    store_file
                )
            })?,
            None => {
                tracing::info!(path = ?store_file, "No store file found, starting fresh");
                SavedModels::default()
            }
        };

        tracing::info!(
            models = saved.models.len(),
            path = ?store_file,
            "Model store loaded"
        );

        let records = saved
            .models
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();

        Ok(Self {
            store_file,
            storage,
            records: RwLock::new(records),
        })
    }

    /// Open a store backed by the filesystem
    pub async fn open(store_file: PathBuf) -> Result<Self> {
        Self::open_with_storage(store_file, Arc::new(FileSystemStorage::new())).await
    }

    async fn persist(&self, records: &BTreeMap<String, ModelRecord>) -> Result<()> {
        let saved = SavedModels {
            last_updated: Utc::now(),
            models: records.values().cloned().collect(),
        };

        let content =
            toml::to_string_pretty(&saved).context("Failed to serialize models to TOML")?;
        self.storage.save(&self.store_file, &content).await?;

        tracing::debug!(path = ?self.store_file, models = saved.models.len(), "Model store saved");
        Ok(())
    }
}

#[async_trait]
impl ModelStore for TomlModelStore {
    async fn get_model(&self, id: &str) -> Result<Option<ModelRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn save_model(&self, record: ModelRecord) -> Result<()> {
        let mut records = self.records.write().await;
        let id = record.id.clone();
        let previous = records.insert(id.clone(), record);

        if let Err(e) = self.persist(&records).await {
            // Keep memory consistent with what is on disk
            match previous {
                Some(previous) => records.insert(id, previous),
                None => records.remove(&id),
            };
            return Err(e);
        }

        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<ModelRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn delete_model(&self, id: &str) -> Result<bool> {
        let mut records = self.records.write().await;
        let Some(previous) = records.remove(id) else {
            return Ok(false);
        };

        if let Err(e) = self.persist(&records).await {
            records.insert(id.to_string(), previous);
            return Err(e);
        }

        Ok(true)
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================
