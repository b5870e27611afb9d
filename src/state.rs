use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Semaphore;

use subcal_core::cache::CacheStore;

use crate::cache::MemoryStore;
use crate::config::ServerConfig;
use crate::upstream::UpstreamClient;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub upstream: Arc<UpstreamClient>,
    pub store: Arc<dyn CacheStore>,
    /// Bounds concurrent month fetches during a full harvest.
    pub month_permits: Arc<Semaphore>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Result<Self> {
        let upstream = Arc::new(UpstreamClient::new()?);
        Ok(Self::with_parts(config, upstream, Arc::new(MemoryStore::new())))
    }

    pub fn with_parts(
        config: ServerConfig,
        upstream: Arc<UpstreamClient>,
        store: Arc<dyn CacheStore>,
    ) -> Self {
        let month_permits = Arc::new(Semaphore::new(config.month_concurrency));
        AppState {
            config,
            upstream,
            store,
            month_permits,
        }
    }
}
