use std::fmt;
use std::str::FromStr;

use confique::Config;
use serde::{Deserialize, Deserializer};

/// Which record store backs clients, users and tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    #[default]
    Memory,
    File,
    Sql,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "in-memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            "sql" | "sqlite" => Ok(Self::Sql),
            other => Err(format!(
                "unknown store backend '{other}', expected memory, file or sql"
            )),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Memory => "memory",
            Self::File => "file",
            Self::Sql => "sql",
        })
    }
}

impl<'de> Deserialize<'de> for StoreBackend {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

/// Record store configuration
#[derive(Debug, Config, Clone)]
pub struct StoreConfig {
    /// Store backend: "memory", "file" or "sql" (default: memory)
    #[config(env = "HEIMDALL_STORE_BACKEND", default = "memory")]
    pub backend: StoreBackend,

    /// Data directory for the file backend, database file for the sql backend
    /// (default: heimdall-data)
    #[config(env = "HEIMDALL_STORE_PATH", default = "heimdall-data")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            path: "heimdall-data".to_string(),
        }
    }
}

/// Records seeded at start-up
#[derive(Debug, Config, Clone, Default)]
pub struct BootstrapConfig {
    /// Secret for the internal `heimdall` client; generated when unset
    #[config(env = "HEIMDALL_BOOTSTRAP_CLIENT_SECRET")]
    pub client_secret: Option<String>,

    /// Username of an administrator account created if it does not exist
    #[config(env = "HEIMDALL_BOOTSTRAP_ADMIN_USERNAME")]
    pub admin_username: Option<String>,

    /// Password for the administrator account
    #[config(env = "HEIMDALL_BOOTSTRAP_ADMIN_PASSWORD")]
    pub admin_password: Option<String>,
}
