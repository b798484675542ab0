pub(crate) use crate::config::cache::{CacheConfig, CacheStore};
pub(crate) use crate::config::oauth::OAuthConfig;
pub(crate) use crate::config::store::{BootstrapConfig, StoreBackend, StoreConfig};
use confique::Config;

pub mod cache;
pub mod oauth;
pub mod store;

/// Environment variable naming an optional TOML configuration file
pub const CONFIG_FILE_ENV: &str = "HEIMDALL_CONFIG_FILE";

/// Main configuration structure for the Heimdall server
#[derive(Debug, Config, Clone)]
pub struct HeimdallConfig {
    /// The port the server will listen to (default: 8080)
    #[config(env = "HEIMDALL_PORT", default = 8080)]
    pub port: u16,

    /// Mark the session cookie `Secure` (default: true)
    #[config(env = "HEIMDALL_COOKIE_SECURE", default = true)]
    pub cookie_secure: bool,

    #[config(nested)]
    pub oauth: OAuthConfig,

    #[config(nested)]
    pub store: StoreConfig,

    #[config(nested)]
    pub cache: CacheConfig,

    #[config(nested)]
    pub bootstrap: BootstrapConfig,
}

impl HeimdallConfig {
    /// Load from `HEIMDALL_*` environment variables, layered over the TOML file
    /// named by `HEIMDALL_CONFIG_FILE` when set
    pub fn new() -> Result<Self, confique::Error> {
        let builder = Self::builder().env();
        match std::env::var(CONFIG_FILE_ENV) {
            Ok(path) if !path.is_empty() => builder.file(path).load(),
            _ => builder.load(),
        }
    }

    #[cfg(test)]
    pub fn for_test() -> Self {
        Self {
            port: 0, // Let the OS choose a port
            cookie_secure: true,
            oauth: OAuthConfig::default(),
            store: StoreConfig::default(),
            cache: CacheConfig::default(),
            bootstrap: BootstrapConfig::default(),
        }
    }
}
