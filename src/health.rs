//! Heartbeat monitoring for loaded models

use crate::orchestrator::{HeartbeatSummary, Orchestrator};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::{Duration, interval};

/// Periodically reconciles the orchestrator's loaded models with the runtime
pub struct HeartbeatMonitor {
    orchestrator: Arc<Orchestrator>,
    check_interval: Duration,
    /// Consecutive passes where the runtime could not be queried
    consecutive_failures: AtomicU32,
}

impl HeartbeatMonitor {
    pub fn new(orchestrator: Arc<Orchestrator>, check_interval_secs: u64) -> Self {
        Self {
            orchestrator,
            check_interval: Duration::from_secs(check_interval_secs),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Start monitoring loop
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.check_interval);

        tracing::info!(
            interval_secs = self.check_interval.as_secs(),
            "Heartbeat monitoring started"
        );

        loop {
            ticker.tick().await;
            self.check_once().await;
        }
    }

    /// One reconciliation pass; `None` when the runtime could not be queried
    pub async fn check_once(&self) -> Option<HeartbeatSummary> {
        match self.orchestrator.sync_heartbeats().await {
            Ok(summary) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                if !summary.expired.is_empty() {
                    tracing::info!(
                        expired = ?summary.expired,
                        alive = summary.alive,
                        "Models expired from runtime"
                    );
                }
                Some(summary)
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(error = %e, failures = failures, "Heartbeat check failed");
                None
            }
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheManager;
    use crate::catalog::mocks::{MockCatalog, catalog_model};
    use crate::command::mocks::MockCommandRunner;
    use crate::store::ModelRecord;
    use crate::store::mocks::memory_store;

    async fn orchestrator(catalog: Arc<MockCatalog>) -> Arc<Orchestrator> {
        let cache = Arc::new(CacheManager::new(
            Arc::new(MockCommandRunner::new()),
            "foundry".to_string(),
            Duration::from_secs(5),
            Duration::from_secs(5),
        ));
        let (store, _) = memory_store().await;
        Arc::new(Orchestrator::new(catalog, cache, store, 600))
    }

    #[tokio::test]
    async fn test_monitor_creation() {
        let orchestrator = orchestrator(Arc::new(MockCatalog::new())).await;
        let monitor = HeartbeatMonitor::new(orchestrator, 30);
        assert_eq!(monitor.check_interval.as_secs(), 30);
        assert_eq!(monitor.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_check_counts_failures_and_resets() {
        let catalog = Arc::new(MockCatalog::with_catalog(vec![catalog_model(
            "Phi-4-mini-instruct-generic-cpu:1",
            "phi-4-mini",
        )]));
        catalog.downloaded.lock().unwrap().insert("phi-4-mini".to_string());
        let orchestrator = orchestrator(catalog.clone()).await;
        orchestrator
            .register_model(ModelRecord::new(
                "chat".to_string(),
                "Chat".to_string(),
                "phi-4-mini".to_string(),
                "phi-4-mini".to_string(),
            ))
            .await
            .unwrap();
        orchestrator
            .load_model("chat", "phi-4-mini", None, 600)
            .await
            .unwrap();

        let monitor = HeartbeatMonitor::new(orchestrator, 30);

        *catalog.loaded_error.lock().unwrap() = Some("connection refused".to_string());
        assert!(monitor.check_once().await.is_none());
        assert!(monitor.check_once().await.is_none());
        assert_eq!(monitor.consecutive_failures(), 2);

        *catalog.loaded_error.lock().unwrap() = None;
        let summary = monitor.check_once().await.unwrap();
        assert_eq!(summary.alive, 1);
        assert!(summary.expired.is_empty());
        assert_eq!(monitor.consecutive_failures(), 0);
    }
}
