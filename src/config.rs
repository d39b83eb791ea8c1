//! TOML configuration.
//!
//! ```toml
//! [store]
//! backend = "sqlite"          # memory | sqlite | redis
//!
//! [sqlite]
//! path = "./data/records.sqlite"
//!
//! [redis]
//! host = "localhost"
//! port = 6379
//! db = 0
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Every section is optional; [`load_config`] fills defaults and validates.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sqlite: SqliteConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    Sqlite,
    Redis,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: BackendKind,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SqliteConfig {
    #[serde(default = "default_sqlite_path")]
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_sqlite_path(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./data/records.sqlite")
}
fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    #[serde(default = "default_redis_host")]
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub db: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default = "default_timeout_secs")]
    pub socket_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_retry_on_timeout")]
    pub retry_on_timeout: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            db: 0,
            username: None,
            password: None,
            ssl: false,
            socket_timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_timeout_secs(),
            retry_on_timeout: default_retry_on_timeout(),
        }
    }
}

fn default_redis_host() -> String {
    "localhost".to_string()
}
fn default_redis_port() -> u16 {
    6379
}
fn default_timeout_secs() -> u64 {
    5
}
fn default_retry_on_timeout() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// In-memory configuration with all defaults; needs no file.
    pub fn minimal() -> Self {
        Self::default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.sqlite.max_connections == 0 {
        anyhow::bail!("sqlite.max_connections must be > 0");
    }

    if config.redis.port == 0 {
        anyhow::bail!("redis.port must be > 0");
    }

    if config.redis.socket_timeout_secs == 0 || config.redis.connect_timeout_secs == 0 {
        anyhow::bail!("redis timeouts must be > 0 seconds");
    }

    if config.store.backend == BackendKind::Redis && !cfg!(feature = "redis") {
        anyhow::bail!("store.backend is 'redis' but this build lacks the `redis` feature");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(tmp: &TempDir, content: &str) -> PathBuf {
        let path = tmp.path().join("hrec.toml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let cfg = load_config(&write_config(&tmp, "")).unwrap();
        assert_eq!(cfg.store.backend, BackendKind::Memory);
        assert_eq!(cfg.redis.host, "localhost");
        assert_eq!(cfg.redis.port, 6379);
        assert_eq!(cfg.redis.socket_timeout_secs, 5);
        assert!(cfg.redis.retry_on_timeout);
        assert_eq!(cfg.sqlite.max_connections, 5);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_sqlite_section() {
        let tmp = TempDir::new().unwrap();
        let cfg = load_config(&write_config(
            &tmp,
            "[store]\nbackend = \"sqlite\"\n\n[sqlite]\npath = \"/tmp/x.sqlite\"\n",
        ))
        .unwrap();
        assert_eq!(cfg.store.backend, BackendKind::Sqlite);
        assert_eq!(cfg.sqlite.path, PathBuf::from("/tmp/x.sqlite"));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let tmp = TempDir::new().unwrap();
        let err = load_config(&write_config(&tmp, "[store]\nbackend = \"mongo\"\n"));
        assert!(err.is_err());
    }

    #[test]
    fn test_zero_connections_rejected() {
        let tmp = TempDir::new().unwrap();
        let err = load_config(&write_config(&tmp, "[sqlite]\nmax_connections = 0\n")).unwrap_err();
        assert!(err.to_string().contains("max_connections"));
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/hrec.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
