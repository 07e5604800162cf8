//! Backend driver seam.
//!
//! Every backend exposes the same capability set through [`BackendConnection`]:
//! run a statement, optionally probe liveness, close. [`Connector`] opens
//! connections and is injected into the registry, so tests can substitute
//! scripted backends for real servers.

use crate::db::{hive, mysql, presto};
use crate::error::GatewayResult;
use crate::models::{BackendType, LogicalDatabaseConfig, QueryResult};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Outcome of an active liveness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Dead(String),
    /// The backend has no validation primitive; the connection is assumed
    /// live until a statement fails on it.
    Unsupported,
}

/// A live, backend-specific connection.
#[async_trait]
pub trait BackendConnection: Send {
    fn backend(&self) -> BackendType;

    /// Execute a statement and collect column names plus every row.
    async fn execute(&mut self, sql: &str) -> GatewayResult<QueryResult>;

    async fn probe(&mut self) -> Liveness {
        Liveness::Unsupported
    }

    /// Release the connection. Errors are reported, not retried.
    async fn close(self: Box<Self>) -> GatewayResult<()>;
}

/// Opens backend connections from configuration.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        config: &LogicalDatabaseConfig,
    ) -> GatewayResult<Box<dyn BackendConnection>>;
}

/// The production connector, dispatching on the configured backend type.
#[derive(Debug, Clone)]
pub struct DriverConnector {
    connect_timeout: Duration,
    http: reqwest::Client,
}

impl DriverConnector {
    pub fn new(connect_timeout: Duration) -> GatewayResult<Self> {
        let http = presto::build_http_client(connect_timeout)?;
        Ok(Self {
            connect_timeout,
            http,
        })
    }
}

#[async_trait]
impl Connector for DriverConnector {
    async fn connect(
        &self,
        config: &LogicalDatabaseConfig,
    ) -> GatewayResult<Box<dyn BackendConnection>> {
        let backend = config.backend()?;
        debug!(database = %config.name, backend = %backend, "Opening backend connection");

        match backend {
            BackendType::MySql => {
                let conn = mysql::MySqlBackend::connect(config, self.connect_timeout).await?;
                Ok(Box::new(conn))
            }
            BackendType::Presto => {
                let conn = presto::PrestoBackend::connect(config, self.http.clone())?;
                Ok(Box::new(conn))
            }
            BackendType::Hive => {
                let conn = hive::HiveBackend::connect(config, self.connect_timeout).await?;
                Ok(Box::new(conn))
            }
        }
    }
}
