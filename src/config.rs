//! Configuration structures and loading logic

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main manager configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub api_port: u16,
    pub store_file: PathBuf,

    /// Name or path of the Foundry Local CLI
    pub cli_path: String,

    /// Fixed runtime service URL; when unset the URL is discovered via the CLI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,

    pub command_timeout_secs: u64,
    /// `model load` through the CLI can take as long as a download
    pub cli_load_timeout_secs: u64,
    pub http_timeout_secs: u64,
    pub download_timeout_secs: u64,

    pub default_ttl_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub cleanup_on_shutdown: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            store_file: default_store_file(),
            cli_path: default_cli_path(),
            service_url: None,
            command_timeout_secs: default_command_timeout(),
            cli_load_timeout_secs: default_cli_load_timeout(),
            http_timeout_secs: default_http_timeout(),
            download_timeout_secs: default_download_timeout(),
            default_ttl_secs: default_ttl(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            cleanup_on_shutdown: true,
        }
    }
}

impl ManagerConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if let Ok(port) = std::env::var("FOUNDRY_ORCH_API_PORT") {
            config.api_port = port
                .parse()
                .context("Invalid FOUNDRY_ORCH_API_PORT value")?;
        }
        if let Ok(store_file) = std::env::var("FOUNDRY_ORCH_STORE_FILE") {
            config.store_file = PathBuf::from(store_file);
        }
        if let Ok(cli_path) = std::env::var("FOUNDRY_ORCH_CLI_PATH") {
            config.cli_path = cli_path;
        }
        if let Ok(url) = std::env::var("FOUNDRY_ORCH_SERVICE_URL") {
            config.service_url = Some(url);
        }
        if let Ok(timeout) = std::env::var("FOUNDRY_ORCH_COMMAND_TIMEOUT") {
            config.command_timeout_secs = timeout
                .parse()
                .context("Invalid FOUNDRY_ORCH_COMMAND_TIMEOUT value")?;
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api_port < 1024 {
            anyhow::bail!("API port must be >= 1024 (got {})", self.api_port);
        }

        if self.cli_path.trim().is_empty() {
            anyhow::bail!("cli_path cannot be empty");
        }

        for (name, value) in [
            ("command_timeout_secs", self.command_timeout_secs),
            ("cli_load_timeout_secs", self.cli_load_timeout_secs),
            ("http_timeout_secs", self.http_timeout_secs),
            ("download_timeout_secs", self.download_timeout_secs),
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
        ] {
            if value == 0 {
                anyhow::bail!("{} must be greater than zero", name);
            }
        }

        if let Some(url) = &self.service_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            anyhow::bail!("service_url must be an http(s) URL (got '{}')", url);
        }

        // Ensure store file directory exists or can be created
        if let Some(parent) = self.store_file.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create store file directory: {:?}", parent))?;
        }

        Ok(())
    }
}

// Default functions
fn default_api_port() -> u16 {
    3001
}
fn default_store_file() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("foundry-orchestrator/models.toml"))
        .unwrap_or_else(|| PathBuf::from("/tmp/foundry-orchestrator/models.toml"))
}
fn default_cli_path() -> String {
    "foundry".to_string()
}
fn default_command_timeout() -> u64 {
    60
}
fn default_cli_load_timeout() -> u64 {
    900
}
fn default_http_timeout() -> u64 {
    30
}
fn default_download_timeout() -> u64 {
    3600
}
fn default_ttl() -> u64 {
    600
}
fn default_heartbeat_interval() -> u64 {
    30
}
