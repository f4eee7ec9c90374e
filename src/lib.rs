//! Foundry Orchestrator - lifecycle manager for a shared Foundry Local runtime
//!
//! Maps logical model ids onto the single Foundry Local service, handles
//! first-use downloads, loads cache-only models through the CLI, and manages
//! the runtime's cache directory from untrusted input.

pub mod api;
pub mod cache;
pub mod catalog;
pub mod command;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod orchestrator;
pub mod store;

pub use cache::{CacheLocation, CacheManager, CacheModelRecord, CacheSwitchResult};
pub use catalog::{CatalogModel, DeviceType, FoundryLocalCatalog, LoadedModelInfo, ModelCatalog, ServiceInfo};
pub use command::{CommandOutput, CommandRunner, CommandSpec, SystemCommandRunner};
pub use config::ManagerConfig;
pub use error::{OrchestratorError, OrchestratorResult};
pub use health::HeartbeatMonitor;
pub use orchestrator::{AvailableModel, Orchestrator};
pub use store::{ModelRecord, ModelSource, ModelStatus, ModelStore, TomlModelStore};
