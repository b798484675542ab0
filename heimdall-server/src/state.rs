use crate::{
    cache::{Cache, CacheBackend},
    config::HeimdallConfig,
    oauth::scope::{AllowAllScopes, ScopePolicy},
    storage::{bootstrap, create_store},
};
use heimdall_store::{Store, StoreError};
use log::warn;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<HeimdallConfig>,
    pub store: Arc<dyn Store>,
    pub cache: Arc<Cache>,
    pub scope_policy: Arc<dyn ScopePolicy>,
}

impl AppState {
    /// Open the record store over an already connected cache and seed it
    pub async fn with_existing_cache(
        config: &HeimdallConfig,
        cache: Cache,
    ) -> Result<Self, StoreError> {
        let store = create_store(config, cache.clone()).await?;
        bootstrap(store.as_ref(), &config.bootstrap).await?;

        Ok(Self {
            config: Arc::new(config.clone()),
            store,
            cache: Arc::new(cache),
            scope_policy: Arc::new(AllowAllScopes),
        })
    }

    /// Replace the policy deciding which requested scopes may be granted
    pub fn with_scope_policy(mut self, policy: impl ScopePolicy + 'static) -> Self {
        self.scope_policy = Arc::new(policy);
        self
    }

    /// Check if all components are healthy
    pub async fn health_check(&self) -> bool {
        let store = self.store.health_check().await;
        if let Err(e) = &store {
            warn!("Record store is unhealthy: {}", e);
        }
        let cache = self.cache.health_check().await;
        if let Err(e) = &cache {
            warn!("Cache is unhealthy: {}", e);
        }
        store.is_ok() && cache.is_ok()
    }
}
