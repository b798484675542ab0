use std::str::FromStr;

use confique::Config;
use serde::{Deserialize, Deserializer};

/// Specifies which cache store implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheStore {
    InMemory,
    Redis,
    #[default]
    None,
}

impl FromStr for CacheStore {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in-memory" => Ok(Self::InMemory),
            "redis" => Ok(Self::Redis),
            "none" | "" => Ok(Self::None),
            other => Err(format!(
                "unknown cache store '{other}', expected in-memory, redis or none"
            )),
        }
    }
}

impl<'de> Deserialize<'de> for CacheStore {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

/// Configuration for the token cache
#[derive(Debug, Config, Clone)]
pub struct CacheConfig {
    /// Upper bound on how long a token stays cached, in seconds (default: 3600)
    #[config(env = "HEIMDALL_CACHE_TTL", default = 3600)]
    pub ttl: u64,

    /// Cache store type: "in-memory", "redis" or "none" (default: none)
    #[config(env = "HEIMDALL_CACHE_STORE", default = "none")]
    pub store: CacheStore,

    /// In-memory cache specific configuration
    #[config(nested)]
    pub memory: InMemoryConfig,

    /// Redis cache specific configuration
    #[config(nested)]
    pub redis: RedisConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: 3600,
            store: CacheStore::None,
            memory: InMemoryConfig::default(),
            redis: RedisConfig::default(),
        }
    }
}

/// In-memory cache configuration options
#[derive(Debug, Config, Clone)]
pub struct InMemoryConfig {
    /// Maximum capacity in MiB (default: 128)
    #[config(env = "HEIMDALL_CACHE_MEMORY_CAPACITY", default = 128)]
    pub capacity: usize,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self { capacity: 128 }
    }
}

/// Redis cache configuration options
#[derive(Debug, Config, Clone, Default)]
pub struct RedisConfig {
    /// Redis connection string
    #[config(env = "HEIMDALL_CACHE_REDIS_URL")]
    pub url: Option<String>,
}
