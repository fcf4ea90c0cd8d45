//! Application state shared across all request handlers.

use crate::config::runtime::RuntimeConfig;
use dealhooks_core::providers::ProviderRegistry;
use dealhooks_core::queue::DispatchQueue;
use dealhooks_core::store::ReceiptStore;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    /// Receipt persistence.
    pub store: Arc<dyn ReceiptStore>,
    /// Dispatch queue feeding the worker pool.
    pub queue: Arc<DispatchQueue>,
    /// Source identifier -> provider mapping.
    pub registry: Arc<ProviderRegistry>,
    /// Runtime configuration (can be reloaded via SIGHUP).
    pub config: Arc<RwLock<RuntimeConfig>>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ReceiptStore>,
        queue: Arc<DispatchQueue>,
        registry: Arc<ProviderRegistry>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            store,
            queue,
            registry,
            config: Arc::new(RwLock::new(config)),
        }
    }

    /// Update the configuration (used during SIGHUP reload).
    pub async fn update_config(&self, new_config: RuntimeConfig) {
        let mut config = self.config.write().await;
        *config = new_config;
    }
}
