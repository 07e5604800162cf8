//! Error types for the SQL gateway.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! The variants collapse onto three caller-facing kinds (see [`ErrorKind`]):
//! an unknown logical database, a connection failure, and a query failure.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Database config '{name}' not found")]
    ConfigNotFound { name: String },

    /// Missing required field, unsupported backend type or driver support not
    /// compiled in. Never retried.
    #[error("Invalid configuration for database '{database}': {message}")]
    Configuration { database: String, message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Query error: {message}")]
    Query {
        message: String,
        /// e.g., "42S02" for unknown table
        sql_state: Option<String>,
    },

    #[error("Query failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        source: Box<GatewayError>,
    },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Result file not found: {file}")]
    ResultNotFound { file: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Caller-facing error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConfigNotFound,
    Connection,
    Query,
    Storage,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigNotFound => "ConfigNotFoundError",
            Self::Connection => "ConnectionError",
            Self::Query => "QueryError",
            Self::Storage => "StorageError",
            Self::Internal => "InternalError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl GatewayError {
    /// Create a config-not-found error.
    pub fn config_not_found(name: impl Into<String>) -> Self {
        Self::ConfigNotFound { name: name.into() }
    }

    /// Create a fatal configuration error for one logical database.
    pub fn configuration(database: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            database: database.into(),
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a query error with optional SQL state.
    pub fn query(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql_state,
        }
    }

    /// Wrap the last failure of a retry loop.
    pub fn retries_exhausted(attempts: u32, last: GatewayError) -> Self {
        Self::RetriesExhausted {
            attempts,
            source: Box::new(last),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn result_not_found(file: impl Into<String>) -> Self {
        Self::ResultNotFound { file: file.into() }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigNotFound { .. } => ErrorKind::ConfigNotFound,
            Self::Configuration { .. } | Self::Connection { .. } => ErrorKind::Connection,
            Self::Query { .. } | Self::RetriesExhausted { .. } => ErrorKind::Query,
            Self::ResultNotFound { .. } | Self::Storage { .. } => ErrorKind::Storage,
            Self::InvalidConfig { .. } | Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::RetriesExhausted { source, .. } => source.suggestion(),
            _ => None,
        }
    }

    /// Number of attempts made before giving up, when this error ended a retry loop.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::RetriesExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    ///
    /// Backend failures are retried regardless of cause, including SQL errors.
    /// Only caller and configuration mistakes fail immediately.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::ConfigNotFound { .. } | Self::Configuration { .. } | Self::InvalidConfig { .. }
        )
    }

    /// HTTP status for this error. Every core failure is reported as a 500.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ResultNotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convert sqlx errors to GatewayError.
impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => GatewayError::connection(
                msg.to_string(),
                "Check host, port and credentials in the database configuration",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                GatewayError::query(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => GatewayError::query("No rows returned", None),
            sqlx::Error::PoolTimedOut => GatewayError::connection(
                "Timed out waiting for a connection",
                "Check database server load",
            ),
            sqlx::Error::PoolClosed => {
                GatewayError::connection("Connection is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => GatewayError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => GatewayError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => GatewayError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                GatewayError::query(format!("Column not found: {}", col), None)
            }
            sqlx::Error::ColumnDecode { index, source } => GatewayError::query(
                format!("Failed to decode column {}: {}", index, source),
                None,
            ),
            sqlx::Error::Decode(source) => {
                GatewayError::query(format!("Decode error: {}", source), None)
            }
            sqlx::Error::WorkerCrashed => {
                GatewayError::connection("Database worker crashed", "Reconnect to the database")
            }
            _ => GatewayError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(serde::Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    error_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    attempts: Option<u32>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: self.to_string(),
            error_type: self.kind().as_str(),
            attempts: self.attempts(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
