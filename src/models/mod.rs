//! Data models for the SQL gateway.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{
    BackendType, DEFAULT_HIVE_ODBC_DRIVER, DEFAULT_PRESTO_CATALOG, DEFAULT_PRESTO_SCHEMA,
    LogicalDatabaseConfig,
};
pub use query::{QueryResult, Value};
