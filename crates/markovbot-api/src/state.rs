//! Application state wiring the chain manager to the filesystem backend.

use std::path::PathBuf;
use std::sync::Arc;

use markovbot_core::service::ChainManager;
use markovbot_infra::config::load_store_config;
use markovbot_infra::filesystem::{JsonFileBackend, resolve_data_dir};
use markovbot_types::config::StoreConfig;

/// The manager pinned to the JSON-file backend.
pub type ConcreteChainManager = ChainManager<JsonFileBackend>;

/// Shared application state used by every command.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ConcreteChainManager>,
    pub config: StoreConfig,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Resolve the data directory, load `config.toml` and open the store.
    ///
    /// Fails when the data directory cannot be created or is not a writable
    /// directory.
    pub async fn init(data_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let data_dir = data_dir.unwrap_or_else(resolve_data_dir);
        let config = load_store_config(&data_dir).await;

        let manager = ChainManager::open(JsonFileBackend::new(&data_dir), &config).await?;
        tracing::debug!(
            data_dir = %data_dir.display(),
            cache_capacity = config.cache_capacity,
            "chain store opened"
        );

        Ok(Self {
            manager: Arc::new(manager),
            config,
            data_dir,
        })
    }

    /// Persist every resident chain, reporting how many were written.
    pub async fn flush(&self) -> anyhow::Result<usize> {
        Ok(self.manager.flush_all().await?)
    }
}
