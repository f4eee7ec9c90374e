//! Prometheus metrics

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;

/// How a model reached the running state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPath {
    /// Direct load through the catalog API
    Catalog,
    /// Catalog load after a first-use download
    Download,
    /// Cache-only model loaded through the CLI
    Cli,
}

impl LoadPath {
    fn as_str(self) -> &'static str {
        match self {
            Self::Catalog => "catalog",
            Self::Download => "download",
            Self::Cli => "cli",
        }
    }
}

/// Setup Prometheus metrics exporter
/// Returns a handle that can be used to retrieve metrics
pub fn setup_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    tracing::info!("Prometheus metrics exporter installed");

    Ok(handle)
}

/// Record a successful model load
pub fn record_model_loaded(model_id: &str, path: LoadPath) {
    metrics::counter!("foundry_orchestrator_model_loads_total",
        "model" => model_id.to_string(),
        "path" => path.as_str()
    )
    .increment(1);
}

/// Record a load that ended in the error state
pub fn record_load_failure(model_id: &str) {
    metrics::counter!("foundry_orchestrator_load_failures_total",
        "model" => model_id.to_string()
    )
    .increment(1);
}

/// Record model unload
pub fn record_model_unloaded(model_id: &str) {
    metrics::counter!("foundry_orchestrator_model_unloads_total",
        "model" => model_id.to_string()
    )
    .increment(1);
}

/// Record a confirmed cache directory switch
pub fn record_cache_switch(is_default: bool) {
    metrics::counter!("foundry_orchestrator_cache_switches_total",
        "default" => is_default.to_string()
    )
    .increment(1);
}

/// Update loaded model count gauge
pub fn update_loaded_count(count: usize) {
    metrics::gauge!("foundry_orchestrator_loaded_models").set(count as f64);
}
