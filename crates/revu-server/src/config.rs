//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Default CORS allowed origin for local development.
pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "http://localhost:3000";

// ============================================================================
// Upload Configuration Constants
// ============================================================================

/// Default root for extracted session trees.
pub const DEFAULT_DATA_DIR: &str = "data/uploads/sessions";

/// Default staging directory for uploaded archives.
pub const DEFAULT_TEMP_DIR: &str = "data/temp_uploads";

/// Default maximum accepted archive size (512 MiB).
pub const DEFAULT_MAX_ARCHIVE_BYTES: u64 = 512 * 1024 * 1024;

/// Default maximum number of entries in one archive.
pub const DEFAULT_MAX_ENTRIES: u64 = 100_000;

/// Default maximum total uncompressed size (2 GiB).
pub const DEFAULT_MAX_TOTAL_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Default number of entries between progress events.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 10;

/// Default number of records per index insert.
pub const DEFAULT_INSERT_BATCH_SIZE: usize = 500;

/// Default per-subscriber event buffer.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

/// Postgres accepts at most 65535 bind parameters per statement; a file index
/// row binds seven.
pub const MAX_INSERT_BATCH_SIZE: usize = 65535 / 7;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cors: CorsConfig,
    pub upload: UploadConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Database configuration
///
/// Without a URL the server runs on in-memory stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

/// Archive ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub data_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub max_archive_bytes: u64,
    pub max_entries: u64,
    pub max_total_bytes: u64,
    pub progress_interval: u64,
    pub insert_batch_size: usize,
    pub subscriber_buffer: usize,
    pub cleanup_on_error: bool,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_env();
        config.validate()?;

        Ok(config)
    }

    /// Read configuration from the process environment without validating it
    pub fn from_env() -> Self {
        Config {
            server: ServerConfig {
                host: std::env::var("REVU_HOST")
                    .unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: env_or("REVU_PORT", DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: env_or(
                    "REVU_SHUTDOWN_TIMEOUT",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                ),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
                max_connections: env_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                min_connections: env_or(
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                ),
                connect_timeout_secs: env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
                idle_timeout_secs: env_or(
                    "DATABASE_IDLE_TIMEOUT",
                    DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
                ),
            },
            cors: CorsConfig {
                allowed_origins: std::env::var("CORS_ALLOWED_ORIGINS")
                    .unwrap_or_else(|_| DEFAULT_CORS_ALLOWED_ORIGIN.to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                allow_credentials: env_or("CORS_ALLOW_CREDENTIALS", true),
            },
            upload: UploadConfig {
                data_dir: env_or("REVU_DATA_DIR", PathBuf::from(DEFAULT_DATA_DIR)),
                temp_dir: env_or("REVU_TEMP_DIR", PathBuf::from(DEFAULT_TEMP_DIR)),
                max_archive_bytes: env_or("REVU_MAX_ARCHIVE_BYTES", DEFAULT_MAX_ARCHIVE_BYTES),
                max_entries: env_or("REVU_MAX_ENTRIES", DEFAULT_MAX_ENTRIES),
                max_total_bytes: env_or("REVU_MAX_TOTAL_BYTES", DEFAULT_MAX_TOTAL_BYTES),
                progress_interval: env_or("REVU_PROGRESS_INTERVAL", DEFAULT_PROGRESS_INTERVAL),
                insert_batch_size: env_or("REVU_INSERT_BATCH_SIZE", DEFAULT_INSERT_BATCH_SIZE),
                subscriber_buffer: env_or("REVU_SUBSCRIBER_BUFFER", DEFAULT_SUBSCRIBER_BUFFER),
                cleanup_on_error: env_or("REVU_CLEANUP_ON_ERROR", true),
            },
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        // Validate port
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        // Validate connection pool settings
        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        self.upload.validate()?;

        // Validate CORS origins
        if self.cors.allowed_origins.is_empty() {
            tracing::warn!("No CORS origins configured - all origins will be allowed");
        }

        Ok(())
    }
}

impl UploadConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.data_dir.as_os_str().is_empty() || self.temp_dir.as_os_str().is_empty() {
            anyhow::bail!("Upload data_dir and temp_dir must be set");
        }

        if self.max_archive_bytes == 0 || self.max_entries == 0 || self.max_total_bytes == 0 {
            anyhow::bail!("Upload limits must be greater than 0");
        }

        if self.progress_interval == 0 {
            anyhow::bail!("Upload progress_interval must be greater than 0");
        }

        if self.insert_batch_size == 0 || self.insert_batch_size > MAX_INSERT_BATCH_SIZE {
            anyhow::bail!(
                "Upload insert_batch_size must be between 1 and {}, got {}",
                MAX_INSERT_BATCH_SIZE,
                self.insert_batch_size
            );
        }

        // One slot is always held back for the terminal event
        if self.subscriber_buffer < 2 {
            anyhow::bail!("Upload subscriber_buffer must be at least 2");
        }

        Ok(())
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            temp_dir: PathBuf::from(DEFAULT_TEMP_DIR),
            max_archive_bytes: DEFAULT_MAX_ARCHIVE_BYTES,
            max_entries: DEFAULT_MAX_ENTRIES,
            max_total_bytes: DEFAULT_MAX_TOTAL_BYTES,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            insert_batch_size: DEFAULT_INSERT_BATCH_SIZE,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            cleanup_on_error: true,
        }
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
            database: DatabaseConfig {
                url: None,
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            cors: CorsConfig {
                allowed_origins: vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()],
                allow_credentials: true,
            },
            upload: UploadConfig::default(),
        }
    }
}
