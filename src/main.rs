//! Foundry Orchestrator - Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use foundry_orchestrator::{
    CacheManager, FoundryLocalCatalog, HeartbeatMonitor, Orchestrator, SystemCommandRunner,
    TomlModelStore, api, config::ManagerConfig, metrics,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "foundry-orchestrator")]
#[command(about = "Lifecycle orchestrator for Foundry Local models", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override API port
    #[arg(long)]
    port: Option<u16>,

    /// Override the Foundry CLI binary
    #[arg(long)]
    cli_path: Option<String>,

    /// Attach to a runtime at this URL instead of discovering it
    #[arg(long)]
    service_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "json")]
    log_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    match cli.log_format.as_str() {
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .json()
                .init();
        }
    }

    tracing::info!("Starting Foundry Orchestrator");

    // Load configuration
    let mut config = ManagerConfig::load(cli.config)?;

    // CLI overrides
    if let Some(port) = cli.port {
        config.api_port = port;
    }
    if let Some(cli_path) = cli.cli_path {
        config.cli_path = cli_path;
    }
    if let Some(url) = cli.service_url {
        config.service_url = Some(url);
    }

    config.validate()?;

    tracing::info!(
        api_port = config.api_port,
        store_file = ?config.store_file,
        cli_path = %config.cli_path,
        service_url = ?config.service_url,
        "Configuration loaded"
    );

    // Setup metrics
    let prometheus_handle = metrics::setup_metrics()?;

    // Wire components
    let runner = Arc::new(SystemCommandRunner::new());
    let cache = Arc::new(CacheManager::from_config(&config, runner.clone()));
    let catalog = Arc::new(
        FoundryLocalCatalog::new(&config, runner).context("Failed to create catalog client")?,
    );
    let store = Arc::new(
        TomlModelStore::open(config.store_file.clone())
            .await
            .context("Failed to open model store")?,
    );

    if !cache.check_cli_available().await {
        tracing::warn!(cli = %config.cli_path, "Foundry CLI not found, cache operations will fail");
    }

    let orchestrator = Arc::new(Orchestrator::new(
        catalog,
        cache,
        store,
        config.default_ttl_secs,
    ));

    // Attach to the runtime eagerly; the API retries on demand if this fails
    if let Err(e) = orchestrator.initialize().await {
        tracing::warn!(error = %e, "Runtime not available at startup");
    }

    // Start heartbeat monitor
    let heartbeat_monitor = Arc::new(HeartbeatMonitor::new(
        orchestrator.clone(),
        config.heartbeat_interval_secs,
    ));

    let monitor_handle = tokio::spawn({
        let monitor = heartbeat_monitor.clone();
        async move {
            monitor.run().await;
        }
    });

    // Setup API
    let app_state = api::AppState {
        orchestrator: orchestrator.clone(),
        prometheus_handle,
    };

    let app = api::create_router(app_state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.api_port));
    tracing::info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind API server")?;

    // Graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    tracing::info!("Shutting down...");

    // Cancel heartbeat monitor before touching loaded models
    monitor_handle.abort();

    if config.cleanup_on_shutdown {
        orchestrator.cleanup().await;
    }

    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
