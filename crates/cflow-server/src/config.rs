//! Configuration management

use serde::{Deserialize, Serialize};

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8085;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default SQLite database file.
pub const DEFAULT_DATABASE_PATH: &str = "./data/contentflow.db";

/// Default root directory for content blobs.
pub const DEFAULT_BLOB_ROOT: &str = "./data/blobs";

/// Default transformer catalog file.
pub const DEFAULT_CATALOG_PATH: &str = "./catalog.json";

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub catalog_path: String,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Content store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub database_path: String,
    pub blob_root: String,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: std::env::var("CFLOW_HOST")
                    .unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: std::env::var("CFLOW_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: std::env::var("CFLOW_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            },
            store: StoreConfig {
                database_path: std::env::var("CFLOW_DATABASE_PATH")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_PATH.to_string()),
                blob_root: std::env::var("CFLOW_BLOB_ROOT")
                    .unwrap_or_else(|_| DEFAULT_BLOB_ROOT.to_string()),
            },
            catalog_path: std::env::var("CFLOW_CATALOG")
                .unwrap_or_else(|_| DEFAULT_CATALOG_PATH.to_string()),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }
        if self.store.database_path.is_empty() {
            anyhow::bail!("Database path cannot be empty");
        }
        if self.store.blob_root.is_empty() {
            anyhow::bail!("Blob root cannot be empty");
        }
        if self.catalog_path.is_empty() {
            anyhow::bail!("Catalog path cannot be empty");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            store: StoreConfig {
                database_path: DEFAULT_DATABASE_PATH.to_string(),
                blob_root: DEFAULT_BLOB_ROOT.to_string(),
            },
            catalog_path: DEFAULT_CATALOG_PATH.to_string(),
        }
    }
}
