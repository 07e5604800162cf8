//! MySQL backend.
//!
//! One dedicated `MySqlConnection` per logical database. Sessions are forced
//! to utf8mb4 and autocommit right after connecting, so every statement is
//! committed on its own.

use crate::db::driver::{BackendConnection, Liveness};
use crate::db::types;
use crate::error::{GatewayError, GatewayResult};
use crate::models::{BackendType, LogicalDatabaseConfig, QueryResult};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{Column, Connection, Executor, Statement};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

const SESSION_SETUP: &[&str] = &[
    "SET NAMES utf8mb4",
    "SET CHARACTER SET utf8mb4",
    "SET character_set_connection=utf8mb4",
    "SET character_set_results=utf8mb4",
    "SET character_set_client=utf8mb4",
    "SET autocommit=1",
];

pub struct MySqlBackend {
    conn: MySqlConnection,
}

impl std::fmt::Debug for MySqlBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlBackend").finish_non_exhaustive()
    }
}

impl MySqlBackend {
    /// Open a connection and prepare the session.
    pub async fn connect(
        config: &LogicalDatabaseConfig,
        connect_timeout: Duration,
    ) -> GatewayResult<Self> {
        let mut options = MySqlConnectOptions::new()
            .host(config.require_host()?)
            .port(config.require_port()?)
            .username(config.require_user()?)
            .password(config.password_or_empty())
            .charset("utf8mb4")
            .collation("utf8mb4_unicode_ci");
        if let Some(database) = config.database.as_deref().filter(|d| !d.is_empty()) {
            options = options.database(database);
        }

        let mut conn = match timeout(connect_timeout, MySqlConnection::connect_with(&options)).await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                return Err(GatewayError::connection(
                    format!("Failed to connect to '{}': {}", config.name, e),
                    connection_suggestion(&e),
                ));
            }
            Err(_) => {
                return Err(GatewayError::connection(
                    format!(
                        "Timed out after {}s connecting to '{}'",
                        connect_timeout.as_secs(),
                        config.name
                    ),
                    "Check that the MySQL server is reachable from the gateway",
                ));
            }
        };

        for stmt in SESSION_SETUP {
            if let Err(e) = conn.execute(*stmt).await {
                // Half-initialized sessions are not kept
                if let Err(close_err) = conn.close().await {
                    warn!(database = %config.name, error = %close_err, "Failed to close MySQL connection");
                }
                return Err(e.into());
            }
        }

        debug!(database = %config.name, "MySQL session ready");
        Ok(Self { conn })
    }

    /// Column names when the statement produced no rows.
    ///
    /// Statements without result metadata (DDL, DML) yield no columns.
    async fn describe_columns(&mut self, sql: &str) -> Vec<String> {
        match (&mut self.conn).prepare(sql).await {
            Ok(statement) => statement
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            Err(e) => {
                debug!(error = %e, "Statement has no describable columns");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl BackendConnection for MySqlBackend {
    fn backend(&self) -> BackendType {
        BackendType::MySql
    }

    async fn execute(&mut self, sql: &str) -> GatewayResult<QueryResult> {
        let rows: Vec<MySqlRow> = (&mut self.conn).fetch(sql).try_collect().await?;

        let Some(first) = rows.first() else {
            let columns = self.describe_columns(sql).await;
            return Ok(QueryResult::new(columns, Vec::new()));
        };

        let columns = types::column_names(first);
        let rows = rows.iter().map(types::decode_row).collect();
        Ok(QueryResult::new(columns, rows))
    }

    async fn probe(&mut self) -> Liveness {
        match self.conn.ping().await {
            Ok(()) => Liveness::Alive,
            Err(e) => Liveness::Dead(e.to_string()),
        }
    }

    async fn close(self: Box<Self>) -> GatewayResult<()> {
        self.conn.close().await?;
        Ok(())
    }
}

/// Generate a helpful suggestion based on the connection error.
fn connection_suggestion(error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return "Check that the MySQL server is running and accessible".to_string();
    }

    if error_str.contains("access denied") || error_str.contains("password") {
        return "Verify the user and password in the database configuration".to_string();
    }

    if error_str.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check TLS/SSL configuration or try disabling it".to_string();
    }

    "Verify host and port in the database configuration".to_string()
}
