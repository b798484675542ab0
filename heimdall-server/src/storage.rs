use std::sync::Arc;
use std::time::Duration;

use heimdall_store::{
    Client, ClientStore, ClientType, FileStore, MemoryStore, SqlStore, Store, StoreError,
    StoreResult, UserStore,
};
use log::{info, warn};

use crate::cache::store::CachedStore;
use crate::cache::Cache;
use crate::config::{BootstrapConfig, HeimdallConfig, StoreBackend};
use crate::oauth::INTERNAL_CLIENT_ID;

/// Open the configured record store, wrapped in the token cache unless caching is off
pub async fn create_store(config: &HeimdallConfig, cache: Cache) -> StoreResult<Arc<dyn Store>> {
    let backend: Arc<dyn Store> = match config.store.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::File => Arc::new(FileStore::open(&config.store.path).await?),
        StoreBackend::Sql => Arc::new(SqlStore::open(&config.store.path)?),
    };
    info!(
        "Using {} record store (cache: {})",
        backend.name(),
        cache.name()
    );

    if let Cache::Null(_) = cache {
        return Ok(backend);
    }
    let ttl = Duration::from_secs(config.cache.ttl);
    Ok(Arc::new(CachedStore::new(backend, cache, ttl)))
}

/// Seed the records the server relies on.
///
/// The internal `heimdall` client owns login sessions and Basic logins, so it
/// must exist before the first request. An administrator account is created
/// when both a username and password are configured.
pub async fn bootstrap(store: &dyn Store, config: &BootstrapConfig) -> StoreResult<()> {
    ensure_internal_client(store, config).await?;

    if let (Some(username), Some(password)) = (
        config.admin_username.as_deref(),
        config.admin_password.as_deref(),
    ) {
        ensure_admin(store, username, password).await?;
    }
    Ok(())
}

async fn ensure_internal_client(store: &dyn Store, config: &BootstrapConfig) -> StoreResult<()> {
    match store.get_client(INTERNAL_CLIENT_ID).await {
        Ok(mut client) => {
            if let Some(secret) = &config.client_secret {
                if &client.secret != secret {
                    client.secret = secret.clone();
                    store.update_client(&client).await?;
                    info!("Updated the secret of the internal client");
                }
            }
            Ok(())
        }
        Err(StoreError::NotFound) => {
            let mut client = Client::new(INTERNAL_CLIENT_ID);
            client.name = "Heimdall".to_string();
            client.client_type = ClientType::Confidential;
            client.internal = true;
            if let Some(secret) = &config.client_secret {
                client.secret = secret.clone();
            }
            store.create_client(&client).await?;
            info!("Created internal client '{}'", INTERNAL_CLIENT_ID);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn ensure_admin(store: &dyn Store, username: &str, password: &str) -> StoreResult<()> {
    match store.verify_user(username, password).await {
        Ok(_) => return Ok(()),
        Err(StoreError::InvalidCredentials) => {}
        Err(e) => return Err(e),
    }

    let mut user = store.new_user();
    user.name = username.to_string();
    user.set_password(username, password);
    match store.create_user(&user).await {
        Ok(()) => {
            info!("Created administrator account '{}'", username);
            Ok(())
        }
        // The username is taken with a different password; leave it alone
        Err(StoreError::Backend(reason)) => {
            warn!("Administrator account not created: {}", reason);
            Ok(())
        }
        Err(e) => Err(e),
    }
}
