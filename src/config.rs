//! Configuration handling for the SQL gateway.
//!
//! This module provides process configuration via CLI arguments and environment
//! variables, and the resolver that maps logical database names to backend
//! connection settings.

use crate::error::{GatewayError, GatewayResult};
use crate::models::LogicalDatabaseConfig;
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_HTTP_HOST: &str = "0.0.0.0";
pub const DEFAULT_HTTP_PORT: u16 = 8000;
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 1000;
pub const DEFAULT_DATA_DIR: &str = "data/sql";
pub const DEFAULT_FILE_EXPIRY_HOURS: u64 = 48;
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 3600;

/// Logical database configurations, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct DatabaseConfigs {
    entries: HashMap<String, Arc<LogicalDatabaseConfig>>,
}

impl DatabaseConfigs {
    /// Parse the JSON document mapping logical names to backend settings.
    ///
    /// # Format
    ///
    /// ```text
    /// {
    ///   "prod":      {"type": "mysql",  "host": "10.0.0.5", "port": 3306, "user": "app", "password": "...", "database": "shop"},
    ///   "warehouse": {"type": "presto", "host": "presto",   "port": 8080, "user": "etl", "catalog": "hive", "schema": "dw"},
    ///   "legacy":    {"type": "hive",   "host": "hs2",      "port": 10000, "user": "etl"}
    /// }
    /// ```
    pub fn from_json(payload: &str) -> GatewayResult<Self> {
        let raw: HashMap<String, LogicalDatabaseConfig> = serde_json::from_str(payload)
            .map_err(|e| {
                GatewayError::invalid_config(format!("Database configs are not valid JSON: {}", e))
            })?;

        if raw.keys().any(|name| name.trim().is_empty()) {
            return Err(GatewayError::invalid_config(
                "Database configs contain an empty logical name",
            ));
        }

        let entries = raw
            .into_iter()
            .map(|(name, mut config)| {
                config.name = name.clone();
                (name, Arc::new(config))
            })
            .collect();

        Ok(Self { entries })
    }

    /// Build from already-constructed configs (useful for testing).
    pub fn from_configs(configs: impl IntoIterator<Item = LogicalDatabaseConfig>) -> Self {
        let entries = configs
            .into_iter()
            .map(|c| (c.name.clone(), Arc::new(c)))
            .collect();
        Self { entries }
    }

    /// Look up the config for a logical database name.
    pub fn get(&self, name: &str) -> GatewayResult<Arc<LogicalDatabaseConfig>> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::config_not_found(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// List configured logical database names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Configuration for the SQL gateway.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "sql-gateway",
    about = "SQL execution gateway for MySQL, Presto and Hive backends",
    version,
    author
)]
pub struct Config {
    /// JSON object mapping logical database names to backend settings.
    #[arg(
        long = "databases",
        value_name = "JSON",
        env = "DATABASE_CONFIGS",
        default_value = "{}",
        hide_env_values = true
    )]
    pub databases: String,

    /// API keys accepted as Bearer tokens.
    /// Can be specified multiple times or as comma-separated values.
    /// When empty, authentication is disabled.
    #[arg(
        long = "api-key",
        value_name = "TOKEN",
        env = "API_KEY",
        value_delimiter = ',',
        hide_env_values = true
    )]
    pub api_keys: Vec<String>,

    /// HTTP host to bind to
    #[arg(long, default_value = DEFAULT_HTTP_HOST, env = "SQL_GATEWAY_HTTP_HOST")]
    pub http_host: String,

    /// HTTP port to bind to
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT, env = "SQL_GATEWAY_HTTP_PORT")]
    pub http_port: u16,

    /// Idle time in seconds after which a cached connection is recycled
    #[arg(
        long,
        default_value_t = DEFAULT_CONNECTION_TIMEOUT_SECS,
        env = "SQL_GATEWAY_CONNECTION_TIMEOUT"
    )]
    pub connection_timeout: u64,

    /// Driver connect timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS,
        env = "SQL_GATEWAY_CONNECT_TIMEOUT"
    )]
    pub connect_timeout: u64,

    /// Total attempts per query, including the first
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_ATTEMPTS,
        env = "SQL_GATEWAY_MAX_ATTEMPTS"
    )]
    pub max_attempts: u32,

    /// Wait between attempts in milliseconds
    #[arg(
        long,
        default_value_t = DEFAULT_RETRY_BACKOFF_MS,
        env = "SQL_GATEWAY_RETRY_BACKOFF_MS"
    )]
    pub retry_backoff_ms: u64,

    /// Directory for file-based query results
    #[arg(long, default_value = DEFAULT_DATA_DIR, env = "SQL_GATEWAY_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Age in hours after which result files are deleted
    #[arg(
        long,
        default_value_t = DEFAULT_FILE_EXPIRY_HOURS,
        env = "SQL_GATEWAY_FILE_EXPIRY_HOURS"
    )]
    pub file_expiry_hours: u64,

    /// Interval in seconds between result file cleanups
    #[arg(
        long = "cleanup-interval",
        default_value_t = DEFAULT_CLEANUP_INTERVAL_SECS,
        env = "SQL_GATEWAY_CLEANUP_INTERVAL"
    )]
    pub cleanup_interval: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "SQL_GATEWAY_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "SQL_GATEWAY_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            databases: "{}".to_string(),
            api_keys: Vec::new(),
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT_SECS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            file_expiry_hours: DEFAULT_FILE_EXPIRY_HOURS,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL_SECS,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    /// Validate settings that clap cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_string());
        }
        if self.connection_timeout == 0 {
            return Err("connection_timeout must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Parse the logical database configurations.
    pub fn database_configs(&self) -> GatewayResult<DatabaseConfigs> {
        DatabaseConfigs::from_json(&self.databases)
    }

    /// Get the HTTP bind address.
    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    pub fn connection_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }

    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn retry_backoff_duration(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn file_expiry_duration(&self) -> Duration {
        Duration::from_secs(self.file_expiry_hours * 3600)
    }

    pub fn cleanup_interval_duration(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::BackendType;

    const SAMPLE: &str = r#"{
        "prod": {"type": "mysql", "host": "10.0.0.5", "port": 3306, "user": "app", "password": "pw", "database": "shop"},
        "warehouse": {"type": "Presto", "host": "presto", "port": 8080, "user": "etl"},
        "legacy": {"type": "hive", "host": "hs2", "port": 10000, "user": "etl"}
    }"#;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.connection_timeout_duration(), Duration::from_secs(300));
        assert_eq!(config.retry_backoff_duration(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_http_bind_addr() {
        let config = Config {
            http_host: "127.0.0.1".to_string(),
            http_port: 3000,
            ..Config::default()
        };
        assert_eq!(config.http_bind_addr(), "127.0.0.1:3000");
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let config = Config {
            max_attempts: 0,
            ..Config::default()
        };
        assert!(config.validate().unwrap_err().contains("max_attempts"));
    }

    #[test]
    fn test_file_expiry_in_hours() {
        let config = Config {
            file_expiry_hours: 2,
            ..Config::default()
        };
        assert_eq!(config.file_expiry_duration(), Duration::from_secs(7200));
    }

    #[test]
    fn test_parse_database_configs() {
        let configs = DatabaseConfigs::from_json(SAMPLE).unwrap();
        assert_eq!(configs.len(), 3);
        assert_eq!(configs.names(), vec!["legacy", "prod", "warehouse"]);

        let prod = configs.get("prod").unwrap();
        assert_eq!(prod.name, "prod");
        assert_eq!(prod.backend().unwrap(), BackendType::MySql);
        assert_eq!(prod.database.as_deref(), Some("shop"));
        assert_eq!(prod.password.as_deref(), Some("pw"));

        let warehouse = configs.get("warehouse").unwrap();
        assert_eq!(warehouse.backend().unwrap(), BackendType::Presto);
        assert_eq!(warehouse.catalog_or_default(), "hive");
    }

    #[test]
    fn test_unknown_name_is_config_not_found() {
        let configs = DatabaseConfigs::from_json(SAMPLE).unwrap();
        let err = configs.get("staging").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigNotFound);
        assert!(!configs.contains("staging"));
    }

    #[test]
    fn test_invalid_json_fails_fast() {
        let err = DatabaseConfigs::from_json("{not json").unwrap_err();
        assert!(matches!(err, GatewayError::InvalidConfig { .. }));
    }

    #[test]
    fn test_non_object_payload_rejected() {
        assert!(DatabaseConfigs::from_json("[1, 2]").is_err());
    }

    #[test]
    fn test_empty_name_rejected() {
        for payload in [r#"{"": {"type": "mysql"}}"#, r#"{"  ": {"type": "mysql"}}"#] {
            let err = DatabaseConfigs::from_json(payload).unwrap_err();
            assert!(matches!(err, GatewayError::InvalidConfig { .. }));
            assert!(err.to_string().contains("empty logical name"));
        }
    }

    #[test]
    fn test_empty_object_is_valid() {
        let configs = DatabaseConfigs::from_json("{}").unwrap();
        assert!(configs.is_empty());
    }

    #[test]
    fn test_unknown_backend_type_deferred_to_connect() {
        let configs =
            DatabaseConfigs::from_json(r#"{"x": {"type": "oracle", "host": "h"}}"#).unwrap();
        assert!(configs.get("x").unwrap().backend().is_err());
    }
}
