//! Connection-related data models.
//!
//! This module defines the backend type enum and the per-logical-database
//! configuration record loaded at startup.

use crate::error::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const DEFAULT_PRESTO_CATALOG: &str = "hive";
pub const DEFAULT_PRESTO_SCHEMA: &str = "default";
pub const DEFAULT_HIVE_ODBC_DRIVER: &str = "Cloudera ODBC Driver for Apache Hive";

/// Supported backend types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Includes MariaDB
    MySql,
    Hive,
    Presto,
}

impl BackendType {
    /// Get the display name for this backend type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::MySql => "MySQL",
            Self::Hive => "Hive",
            Self::Presto => "Presto",
        }
    }

    /// Whether connections of this type expose an active liveness check.
    pub fn supports_ping(&self) -> bool {
        matches!(self, Self::MySql)
    }
}

impl FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Self::MySql),
            "hive" => Ok(Self::Hive),
            "presto" => Ok(Self::Presto),
            other => Err(format!("Unsupported database type: {}", other)),
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Configuration for one logical database, keyed by its name.
///
/// Field presence is only checked when a connection is opened, so a bad entry
/// affects its own logical database and nothing else.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct LogicalDatabaseConfig {
    /// Filled in from the key of the configuration map.
    #[serde(skip)]
    pub name: String,
    #[serde(rename = "type")]
    pub backend_type: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    /// Contains sensitive data - never log
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    pub database: Option<String>,
    pub catalog: Option<String>,
    pub schema: Option<String>,
    /// Presto only: "http" or "https".
    pub http_scheme: Option<String>,
    /// Hive only: name of the installed ODBC driver.
    pub odbc_driver: Option<String>,
}

impl LogicalDatabaseConfig {
    /// Resolve the backend type string.
    pub fn backend(&self) -> GatewayResult<BackendType> {
        self.backend_type
            .parse()
            .map_err(|msg: String| GatewayError::configuration(&self.name, msg))
    }

    pub fn require_host(&self) -> GatewayResult<&str> {
        self.host
            .as_deref()
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| self.missing("host"))
    }

    pub fn require_port(&self) -> GatewayResult<u16> {
        self.port.ok_or_else(|| self.missing("port"))
    }

    pub fn require_user(&self) -> GatewayResult<&str> {
        self.user
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| self.missing("user"))
    }

    pub fn password_or_empty(&self) -> &str {
        self.password.as_deref().unwrap_or("")
    }

    pub fn catalog_or_default(&self) -> &str {
        self.catalog.as_deref().unwrap_or(DEFAULT_PRESTO_CATALOG)
    }

    pub fn schema_or_default(&self) -> &str {
        self.schema.as_deref().unwrap_or(DEFAULT_PRESTO_SCHEMA)
    }

    pub fn odbc_driver_or_default(&self) -> &str {
        self.odbc_driver
            .as_deref()
            .unwrap_or(DEFAULT_HIVE_ODBC_DRIVER)
    }

    fn missing(&self, field: &str) -> GatewayError {
        GatewayError::configuration(
            &self.name,
            format!("missing required field '{}'", field),
        )
    }
}

impl std::fmt::Debug for LogicalDatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicalDatabaseConfig")
            .field("name", &self.name)
            .field("backend_type", &self.backend_type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("database", &self.database)
            .field("catalog", &self.catalog)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn mysql_config() -> LogicalDatabaseConfig {
        LogicalDatabaseConfig {
            name: "prod".to_string(),
            backend_type: "mysql".to_string(),
            host: Some("db.internal".to_string()),
            port: Some(3306),
            user: Some("reader".to_string()),
            password: Some("secret".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_backend_type_parse_case_insensitive() {
        assert_eq!("MySQL".parse::<BackendType>(), Ok(BackendType::MySql));
        assert_eq!("HIVE".parse::<BackendType>(), Ok(BackendType::Hive));
        assert_eq!(" presto ".parse::<BackendType>(), Ok(BackendType::Presto));
        assert_eq!("mariadb".parse::<BackendType>(), Ok(BackendType::MySql));
        assert!("oracle".parse::<BackendType>().is_err());
    }

    #[test]
    fn test_only_mysql_supports_ping() {
        assert!(BackendType::MySql.supports_ping());
        assert!(!BackendType::Hive.supports_ping());
        assert!(!BackendType::Presto.supports_ping());
    }

    #[test]
    fn test_unsupported_backend_is_configuration_error() {
        let config = LogicalDatabaseConfig {
            backend_type: "mongodb".to_string(),
            ..mysql_config()
        };
        let err = config.backend().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("Unsupported database type: mongodb"));
    }

    #[test]
    fn test_missing_fields_reported_by_name() {
        let config = LogicalDatabaseConfig {
            host: None,
            port: None,
            ..mysql_config()
        };
        assert!(config.require_host().unwrap_err().to_string().contains("'host'"));
        assert!(config.require_port().unwrap_err().to_string().contains("'port'"));
        assert_eq!(config.require_user().unwrap(), "reader");
    }

    #[test]
    fn test_presto_defaults() {
        let config = LogicalDatabaseConfig {
            backend_type: "presto".to_string(),
            ..mysql_config()
        };
        assert_eq!(config.catalog_or_default(), "hive");
        assert_eq!(config.schema_or_default(), "default");
    }

    #[test]
    fn test_debug_masks_password() {
        let rendered = format!("{:?}", mysql_config());
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("****"));
    }
}
