//! Fakes shared by the integration test binaries
#![allow(dead_code)]

use async_trait::async_trait;
use foundry_orchestrator::catalog::ProgressFn;
use foundry_orchestrator::{
    CatalogModel, CommandOutput, CommandRunner, CommandSpec, DeviceType, LoadedModelInfo,
    ModelCatalog, OrchestratorError, OrchestratorResult, ServiceInfo,
};
use std::collections::HashSet;
use std::sync::Mutex;

pub const SERVICE_URL: &str = "http://127.0.0.1:5273";

pub fn catalog_model(id: &str, alias: &str) -> CatalogModel {
    CatalogModel {
        id: id.to_string(),
        alias: alias.to_string(),
        device_type: "CPU".to_string(),
        execution_provider: "CPUExecutionProvider".to_string(),
        model_size: "2048 MB".to_string(),
        version: "1".to_string(),
    }
}

/// In-memory runtime: catalog models load once downloaded
#[derive(Default)]
pub struct FakeCatalog {
    pub catalog: Mutex<Vec<CatalogModel>>,
    pub downloaded: Mutex<HashSet<String>>,
    pub loaded: Mutex<Vec<LoadedModelInfo>>,
    pub fail_catalog: Mutex<bool>,
}

impl FakeCatalog {
    pub fn with_catalog(models: Vec<CatalogModel>) -> Self {
        let fake = Self::default();
        *fake.catalog.lock().unwrap() = models;
        fake
    }

    fn find(&self, alias_or_id: &str) -> Option<CatalogModel> {
        self.catalog
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == alias_or_id || m.alias == alias_or_id)
            .cloned()
    }
}

#[async_trait]
impl ModelCatalog for FakeCatalog {
    async fn start_service(&self) -> OrchestratorResult<ServiceInfo> {
        Ok(ServiceInfo::from_service_url(SERVICE_URL))
    }

    async fn is_service_running(&self) -> OrchestratorResult<bool> {
        Ok(true)
    }

    async fn list_catalog_models(&self) -> OrchestratorResult<Vec<CatalogModel>> {
        if *self.fail_catalog.lock().unwrap() {
            return Err(OrchestratorError::operational("catalog unavailable"));
        }
        Ok(self.catalog.lock().unwrap().clone())
    }

    async fn get_model_info(
        &self,
        alias_or_id: &str,
        _device: Option<DeviceType>,
    ) -> OrchestratorResult<Option<CatalogModel>> {
        Ok(self.find(alias_or_id))
    }

    async fn download_model(
        &self,
        alias: &str,
        _device: Option<DeviceType>,
        _token: Option<&str>,
        _force: bool,
        on_progress: Option<ProgressFn>,
    ) -> OrchestratorResult<()> {
        let model = self.find(alias).ok_or_else(|| OrchestratorError::NotFoundInCatalog {
            alias: alias.to_string(),
        })?;
        if let Some(callback) = on_progress {
            callback(50.0);
            callback(100.0);
        }
        self.downloaded.lock().unwrap().insert(model.id);
        Ok(())
    }

    async fn load_model(
        &self,
        alias: &str,
        _device: Option<DeviceType>,
        _ttl_secs: u64,
    ) -> OrchestratorResult<LoadedModelInfo> {
        let model = self.find(alias).ok_or_else(|| OrchestratorError::NotFoundInCatalog {
            alias: alias.to_string(),
        })?;
        if !self.downloaded.lock().unwrap().contains(&model.id) {
            return Err(OrchestratorError::NotDownloaded {
                alias: alias.to_string(),
            });
        }
        let info = LoadedModelInfo::from(&model);
        self.loaded.lock().unwrap().push(info.clone());
        Ok(info)
    }

    async fn unload_model(
        &self,
        alias: &str,
        _device: Option<DeviceType>,
        _force: bool,
    ) -> OrchestratorResult<()> {
        self.loaded
            .lock()
            .unwrap()
            .retain(|m| m.id != alias && m.alias != alias);
        Ok(())
    }

    async fn list_loaded_models(&self) -> OrchestratorResult<Vec<LoadedModelInfo>> {
        Ok(self.loaded.lock().unwrap().clone())
    }

    async fn probe(&self) -> OrchestratorResult<()> {
        Ok(())
    }
}

/// Runner answering by subcommand (`cache location`, `cache cd`, ...)
///
/// `cache cd <path>` updates the location reported by `cache location`.
pub struct FakeCli {
    location: Mutex<String>,
    listing: Mutex<String>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl FakeCli {
    pub fn new(location: &str) -> Self {
        Self {
            location: Mutex::new(location.to_string()),
            listing: Mutex::new(String::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_listing(&self, listing: &str) {
        *self.listing.lock().unwrap() = listing.to_string();
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, subcommand: &str) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter(|c| c.subcommand() == subcommand)
            .collect()
    }
}

fn ok(stdout: String) -> CommandOutput {
    CommandOutput {
        success: true,
        exit_code: Some(0),
        stdout,
        stderr: String::new(),
    }
}

#[async_trait]
impl CommandRunner for FakeCli {
    async fn run(&self, spec: CommandSpec) -> OrchestratorResult<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());

        let output = match spec.subcommand().as_str() {
            "cache location" => ok(format!(
                "💾 Cache directory path: {}\n",
                self.location.lock().unwrap()
            )),
            "cache cd" => {
                let path = spec.args.get(2).cloned().unwrap_or_default();
                *self.location.lock().unwrap() = path;
                ok("Cache directory changed\n".to_string())
            }
            "cache ls" => ok(self.listing.lock().unwrap().clone()),
            "model load" => ok("🟢 Model loaded successfully\n".to_string()),
            // `which foundry` and friends
            _ => ok(String::new()),
        };

        Ok(output)
    }
}
