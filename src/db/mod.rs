//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Backend driver seam and the three backend adapters
//! - Connection registry with staleness and liveness recycling
//! - Query execution with bounded retry
//! - MySQL type mappings

pub mod driver;
pub mod executor;
pub mod hive;
pub mod mysql;
pub mod presto;
pub mod registry;
pub mod types;

pub use driver::{BackendConnection, Connector, DriverConnector, Liveness};
pub use executor::{QueryExecutor, RetryPolicy};
pub use registry::{ConnectionLease, ConnectionRegistry};
