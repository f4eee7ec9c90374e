//! Foundry cache directory management
//!
//! Wraps the `foundry cache` CLI subcommands. This is the only place that
//! parses free-form CLI text and the only place where caller-supplied data
//! (cache paths, custom model aliases) reaches an external process, so every
//! such value is validated here first.
//!
//! Listing output looks like:
//! ```text
//! Models cached on device:
//!    Alias                                             Model ID
//! 💾 phi-3.5-mini                                      Phi-3.5-mini-instruct-generic-cpu:1
//! 💾 rakuten-ai-7b-onnx                                rakuten-ai-7b-onnx
//! ```

use crate::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::config::ManagerConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::store::ModelSource;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, LazyLock, OnceLock};
use std::time::Duration;

/// Glyph that prefixes every model line of `foundry cache ls`
pub const CACHE_ENTRY_MARKER: char = '💾';

/// Value the API accepts to restore the captured default location
pub const DEFAULT_KEYWORD: &str = "default";

static LOCATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Cache directory path:\s*(.+)").expect("cache location regex is valid")
});

static COLUMN_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s{2,}").expect("column split regex is valid"));

/// Directories a cache may never point into (compared lowercase, `/`-separated)
const DENIED_ROOTS: &[&str] = &[
    "/etc",
    "/sys",
    "/proc",
    "/root",
    "/bin",
    "/sbin",
    "/usr/bin",
    "/usr/sbin",
    "/private/etc",
    "c:/windows",
    "c:/program files",
    "c:/program files (x86)",
];

/// Model physically present in the active cache directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheModelRecord {
    pub alias: String,
    pub id: String,
    pub description: String,
    pub source: ModelSource,
}

/// Active cache directory as reported by the CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheLocation {
    pub location: String,
    pub default_path: Option<String>,
    pub is_default: bool,
}

/// Outcome of a confirmed cache switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSwitchResult {
    pub success: bool,
    pub location: String,
    pub is_default: bool,
}

/// Mediates the cache directory the runtime reads models from
pub struct CacheManager {
    runner: Arc<dyn CommandRunner>,
    cli_path: String,
    command_timeout: Duration,
    cli_load_timeout: Duration,
    /// First successfully observed location; never overwritten
    default_path: OnceLock<String>,
}

impl CacheManager {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        cli_path: String,
        command_timeout: Duration,
        cli_load_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            cli_path,
            command_timeout,
            cli_load_timeout,
            default_path: OnceLock::new(),
        }
    }

    pub fn from_config(config: &ManagerConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self::new(
            runner,
            config.cli_path.clone(),
            Duration::from_secs(config.command_timeout_secs),
            Duration::from_secs(config.cli_load_timeout_secs),
        )
    }

    pub fn cli_path(&self) -> &str {
        &self.cli_path
    }

    async fn run_cli(&self, args: &[&str], timeout: Duration) -> OrchestratorResult<CommandOutput> {
        let spec = CommandSpec::new(self.cli_path.clone(), args.iter().copied(), timeout);
        let description = spec.to_string();
        self.runner.run(spec).await?.ensure_success(&description)
    }

    /// Query the active cache directory
    ///
    /// The first successful answer is captured as the default path.
    pub async fn current_location(&self) -> OrchestratorResult<String> {
        tracing::debug!("Getting current cache location");

        let location = self
            .run_cli(&["cache", "location"], self.command_timeout)
            .await
            .and_then(|output| parse_cache_location(&output.stdout))
            .inspect_err(|e| tracing::error!(error = %e, "Failed to get cache location"))?;

        if self.default_path.set(location.clone()).is_ok() {
            tracing::info!(path = %location, "Captured default cache path");
        }

        Ok(location)
    }

    /// Default cache path captured on the first successful query
    pub fn default_path(&self) -> Option<&str> {
        self.default_path.get().map(String::as_str)
    }

    /// Current location together with its relation to the default
    pub async fn location(&self) -> OrchestratorResult<CacheLocation> {
        let location = self.current_location().await?;
        let default_path = self.default_path().map(str::to_string);
        let is_default = default_path.as_deref() == Some(location.as_str());

        Ok(CacheLocation {
            location,
            default_path,
            is_default,
        })
    }

    /// Point the runtime at a different cache directory
    ///
    /// `"default"` restores the captured default path.
    pub async fn switch_cache(&self, path: &str) -> OrchestratorResult<CacheSwitchResult> {
        let resolved = if path == DEFAULT_KEYWORD {
            let default = self
                .default_path()
                .ok_or(OrchestratorError::DefaultPathUnset)?;
            // Reported by the CLI itself, so only normalized
            normalize_default_path(default)?
        } else {
            validate_cache_path(path).inspect_err(|e| {
                tracing::warn!(requested = %path, error = %e, "Rejected cache path");
            })?
        };
        let resolved = resolved.to_str().ok_or_else(|| {
            OrchestratorError::validation("Cache path must be valid UTF-8")
        })?;

        tracing::info!(path = %resolved, "Switching cache directory");

        self.run_cli(&["cache", "cd", resolved], self.command_timeout)
            .await
            .inspect_err(|e| tracing::error!(path = %resolved, error = %e, "Failed to switch cache"))?;

        // Confirm against what the CLI now reports
        let location = self.current_location().await?;
        let is_default = self.default_path() == Some(location.as_str());

        tracing::info!(
            requested = %resolved,
            actual = %location,
            is_default = is_default,
            "Cache directory switched"
        );
        crate::metrics::record_cache_switch(is_default);

        Ok(CacheSwitchResult {
            success: true,
            location,
            is_default,
        })
    }

    /// List models in the active cache
    ///
    /// Advisory data: any failure yields an empty list.
    pub async fn list_cache_models(&self) -> Vec<CacheModelRecord> {
        match self.run_cli(&["cache", "ls"], self.command_timeout).await {
            Ok(output) => {
                let models = parse_cache_listing(&output.stdout);
                tracing::debug!(count = models.len(), "Cache models listed");
                models
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list cache models, returning empty list");
                Vec::new()
            }
        }
    }

    /// Check whether the CLI binary can be found
    pub async fn check_cli_available(&self) -> bool {
        let probe = if cfg!(windows) { "where" } else { "which" };
        let spec = CommandSpec::new(probe, [self.cli_path.clone()], self.command_timeout);

        match self.runner.run(spec).await {
            Ok(output) if output.success => true,
            Ok(_) => {
                tracing::error!(cli = %self.cli_path, "Foundry CLI not found in PATH");
                false
            }
            Err(e) => {
                tracing::error!(cli = %self.cli_path, error = %e, "Failed to probe for Foundry CLI");
                false
            }
        }
    }

    /// Load a model that only exists in the cache via `foundry model load`
    ///
    /// The alias is checked against the allow-list before anything is spawned.
    pub async fn load_model_via_cli(&self, alias: &str, ttl_secs: u64) -> OrchestratorResult<String> {
        validate_cli_alias(alias)?;

        let ttl = ttl_secs.to_string();
        tracing::info!(alias = %alias, ttl = ttl_secs, "Loading custom model via CLI");

        let output = self
            .run_cli(&["model", "load", alias, "--ttl", &ttl], self.cli_load_timeout)
            .await?;

        tracing::info!(alias = %alias, stdout = %output.stdout.trim(), "Custom model loaded via CLI");
        Ok(output.stdout)
    }
}

/// Extract the directory from `foundry cache location` output
pub fn parse_cache_location(stdout: &str) -> OrchestratorResult<String> {
    LOCATION_RE
        .captures(stdout)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|location| !location.is_empty())
        .ok_or_else(|| {
            OrchestratorError::parse(
                "cache location",
                "output has no 'Cache directory path:' line",
            )
        })
}

/// Parse `foundry cache ls` output; lines without the marker are skipped
pub fn parse_cache_listing(stdout: &str) -> Vec<CacheModelRecord> {
    stdout
        .lines()
        .filter(|line| line.contains(CACHE_ENTRY_MARKER) && !line.contains("Alias"))
        .filter_map(|line| {
            let stripped = line
                .replace(CACHE_ENTRY_MARKER, "")
                .replace('\u{fe0f}', "");
            let mut parts = COLUMN_SPLIT_RE
                .split(stripped.trim())
                .map(str::trim)
                .filter(|p| !p.is_empty());

            let alias = parts.next()?.to_string();
            let id = parts.next()?.to_string();

            Some(CacheModelRecord {
                description: alias.clone(),
                alias,
                id,
                source: ModelSource::Cache,
            })
        })
        .collect()
}

/// Validate an untrusted cache directory
///
/// Returns the absolute, normalized, symlink-resolved path. Components that do
/// not exist yet are normalized lexically under their deepest existing ancestor.
pub fn validate_cache_path(input: &str) -> OrchestratorResult<PathBuf> {
    if input.trim().is_empty() {
        return Err(OrchestratorError::validation("Cache path cannot be empty"));
    }
    if input.contains('\0') {
        return Err(OrchestratorError::validation(
            "Cache path cannot contain NUL bytes",
        ));
    }

    let path = Path::new(input);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| {
                OrchestratorError::operational(format!(
                    "Failed to resolve working directory: {}",
                    e
                ))
            })?
            .join(path)
    };

    let normalized = normalize_lexically(&absolute);
    if is_denied(&normalized) {
        return Err(denied(&normalized));
    }

    let resolved = resolve_real_path(&normalized);
    if is_denied(&resolved) {
        return Err(denied(&resolved));
    }

    Ok(resolved)
}

fn normalize_default_path(default: &str) -> OrchestratorResult<PathBuf> {
    let path = Path::new(default);
    if default.contains('\0') || !path.is_absolute() {
        return Err(OrchestratorError::validation(format!(
            "Captured default cache path {:?} is not a usable absolute path",
            default
        )));
    }
    Ok(normalize_lexically(path))
}

fn denied(path: &Path) -> OrchestratorError {
    OrchestratorError::validation(format!(
        "Cache path {:?} is inside a protected system directory",
        path
    ))
}

/// Resolve `.` and `..` without touching the filesystem
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // pop() refuses to remove the root
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize the deepest existing ancestor and re-append the rest
fn resolve_real_path(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();

    loop {
        if let Ok(real) = std::fs::canonicalize(&existing) {
            let mut resolved = real;
            for part in tail.iter().rev() {
                resolved.push(part);
            }
            return resolved;
        }

        match (existing.file_name().map(|n| n.to_os_string()), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name);
                existing = parent.to_path_buf();
            }
            _ => return path.to_path_buf(),
        }
    }
}

fn is_denied(path: &Path) -> bool {
    let text = path.to_string_lossy().replace('\\', "/").to_lowercase();
    // Windows verbatim prefix from canonicalize
    let text = text.strip_prefix("//?/").unwrap_or(&text);

    DENIED_ROOTS.iter().any(|root| {
        text == *root
            || text
                .strip_prefix(root)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

/// Allow-list for aliases passed to `foundry model load`
///
/// Letters, digits, underscore and single dashes; no leading or trailing dash.
/// Dots are refused so an alias can never form a relative path.
pub fn validate_cli_alias(alias: &str) -> OrchestratorResult<()> {
    if alias.is_empty()
        || !alias
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(OrchestratorError::validation(
            "Invalid model alias for CLI - use only alphanumeric, dash, and underscore characters",
        ));
    }

    if alias.starts_with('-') || alias.ends_with('-') || alias.contains("--") {
        return Err(OrchestratorError::validation("Invalid model alias format"));
    }

    Ok(())
}
