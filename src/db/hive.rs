//! Hive backend.
//!
//! With the `hive` feature, statements go through an ODBC driver for
//! HiveServer2. ODBC handles are blocking and not `Send`, so each connection
//! lives on its own worker thread and is driven over a channel. Without the
//! feature, connecting reports a configuration error that is never retried.

pub use imp::HiveBackend;

#[cfg(feature = "hive")]
mod imp {
    use crate::db::driver::BackendConnection;
    use crate::error::{GatewayError, GatewayResult};
    use crate::models::{BackendType, LogicalDatabaseConfig, QueryResult, Value};
    use async_trait::async_trait;
    use odbc_api::buffers::TextRowSet;
    use odbc_api::{ConnectionOptions, Cursor, Environment, ResultSetMetadata};
    use std::sync::mpsc;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tracing::{debug, warn};

    const BATCH_SIZE: usize = 1000;
    const MAX_TEXT_LEN: usize = 64 * 1024;

    /// SQLSTATEs raised by the driver manager when the named driver is not
    /// installed or its library fails to load.
    const DRIVER_MISSING_STATES: [&str; 2] = ["IM002", "IM003"];

    enum Command {
        Execute {
            sql: String,
            reply: oneshot::Sender<GatewayResult<QueryResult>>,
        },
        Close {
            reply: oneshot::Sender<GatewayResult<()>>,
        },
    }

    #[derive(Debug)]
    pub struct HiveBackend {
        database: String,
        commands: mpsc::Sender<Command>,
    }

    impl HiveBackend {
        pub async fn connect(
            config: &LogicalDatabaseConfig,
            connect_timeout: Duration,
        ) -> GatewayResult<Self> {
            let connection_string = connection_string(config)?;
            let database = config.name.clone();
            let (commands, receiver) = mpsc::channel::<Command>();
            let (ready_tx, ready_rx) = oneshot::channel::<GatewayResult<()>>();

            let thread_name = format!("hive-{}", database);
            std::thread::Builder::new()
                .name(thread_name)
                .spawn({
                    let database = database.clone();
                    move || worker(database, connection_string, receiver, ready_tx)
                })
                .map_err(|e| GatewayError::internal(format!("Failed to spawn Hive worker: {}", e)))?;

            match tokio::time::timeout(connect_timeout, ready_rx).await {
                Ok(Ok(Ok(()))) => {
                    debug!(database = %database, "Hive connection ready");
                    Ok(Self { database, commands })
                }
                Ok(Ok(Err(e))) => Err(e),
                Ok(Err(_)) => Err(GatewayError::internal("Hive worker exited during connect")),
                Err(_) => Err(GatewayError::connection(
                    format!(
                        "Timed out after {}s connecting to '{}'",
                        connect_timeout.as_secs(),
                        database
                    ),
                    "Check that HiveServer2 is reachable from the gateway",
                )),
            }
        }

        fn send(&self, command: Command) -> GatewayResult<()> {
            self.commands.send(command).map_err(|_| {
                GatewayError::connection(
                    format!("Hive connection for '{}' is gone", self.database),
                    "Reconnect to the database",
                )
            })
        }
    }

    #[async_trait]
    impl BackendConnection for HiveBackend {
        fn backend(&self) -> BackendType {
            BackendType::Hive
        }

        async fn execute(&mut self, sql: &str) -> GatewayResult<QueryResult> {
            let (reply, response) = oneshot::channel();
            self.send(Command::Execute {
                sql: sql.to_string(),
                reply,
            })?;
            response
                .await
                .map_err(|_| GatewayError::internal("Hive worker dropped the request"))?
        }

        async fn close(self: Box<Self>) -> GatewayResult<()> {
            let (reply, response) = oneshot::channel();
            self.send(Command::Close { reply })?;
            response
                .await
                .map_err(|_| GatewayError::internal("Hive worker dropped the request"))?
        }
    }

    fn connection_string(config: &LogicalDatabaseConfig) -> GatewayResult<String> {
        let mut parts = vec![
            format!("Driver={{{}}}", config.odbc_driver_or_default()),
            format!("Host={}", config.require_host()?),
            format!("Port={}", config.require_port()?),
            format!("UID={}", config.require_user()?),
        ];
        if !config.password_or_empty().is_empty() {
            parts.push(format!("PWD={}", config.password_or_empty()));
        }
        if let Some(schema) = config.database.as_deref().filter(|d| !d.is_empty()) {
            parts.push(format!("Schema={}", schema));
        }
        Ok(parts.join(";"))
    }

    /// Classify a connect failure. A missing driver cannot be fixed by
    /// retrying, so it is a configuration error; anything else is a
    /// connection error.
    fn connect_error(database: &str, e: odbc_api::Error) -> GatewayError {
        match &e {
            odbc_api::Error::Diagnostics { record, .. }
                if DRIVER_MISSING_STATES.contains(&record.state.as_str()) =>
            {
                GatewayError::configuration(
                    database,
                    format!("Hive ODBC driver is not available: {}", e),
                )
            }
            _ => GatewayError::connection(
                format!("Failed to connect to Hive: {}", e),
                "Check host, port and user of the Hive server",
            ),
        }
    }

    fn worker(
        database: String,
        connection_string: String,
        commands: mpsc::Receiver<Command>,
        ready: oneshot::Sender<GatewayResult<()>>,
    ) {
        let environment = match Environment::new() {
            Ok(env) => env,
            Err(e) => {
                let _ = ready.send(Err(GatewayError::configuration(
                    &database,
                    format!("Failed to initialize ODBC driver manager: {}", e),
                )));
                return;
            }
        };
        let connection = match environment
            .connect_with_connection_string(&connection_string, ConnectionOptions::default())
        {
            Ok(conn) => conn,
            Err(e) => {
                let _ = ready.send(Err(connect_error(&database, e)));
                return;
            }
        };
        if ready.send(Ok(())).is_err() {
            // Caller gave up waiting
            return;
        }

        while let Ok(command) = commands.recv() {
            match command {
                Command::Execute { sql, reply } => {
                    let _ = reply.send(run(&connection, &sql));
                }
                Command::Close { reply } => {
                    // Dropping the handle disconnects
                    drop(connection);
                    let _ = reply.send(Ok(()));
                    return;
                }
            }
        }
        warn!("Hive connection dropped without close");
    }

    fn run(connection: &odbc_api::Connection<'_>, sql: &str) -> GatewayResult<QueryResult> {
        let query_error = |e: odbc_api::Error| GatewayError::query(e.to_string(), None);

        let Some(mut cursor) = connection.execute(sql, ()).map_err(query_error)? else {
            return Ok(QueryResult::empty());
        };

        let columns: Vec<String> = cursor
            .column_names()
            .map_err(query_error)?
            .collect::<Result<_, _>>()
            .map_err(query_error)?;

        let mut buffers = TextRowSet::for_cursor(BATCH_SIZE, &mut cursor, Some(MAX_TEXT_LEN))
            .map_err(query_error)?;
        let mut row_set = cursor.bind_buffer(&mut buffers).map_err(query_error)?;

        let mut rows = Vec::new();
        while let Some(batch) = row_set.fetch().map_err(query_error)? {
            for row_index in 0..batch.num_rows() {
                let row = (0..batch.num_cols())
                    .map(|col| match batch.at(col, row_index) {
                        Some(bytes) => match std::str::from_utf8(bytes) {
                            Ok(text) => Value::Text(text.to_string()),
                            Err(_) => Value::Bytes(bytes.to_vec()),
                        },
                        None => Value::Null,
                    })
                    .collect();
                rows.push(row);
            }
        }

        Ok(QueryResult::new(columns, rows))
    }

}

#[cfg(not(feature = "hive"))]
mod imp {
    use crate::db::driver::BackendConnection;
    use crate::error::{GatewayError, GatewayResult};
    use crate::models::{BackendType, LogicalDatabaseConfig, QueryResult};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Uninhabited: Hive connections cannot exist in this build.
    #[derive(Debug)]
    pub enum HiveBackend {}

    impl HiveBackend {
        pub async fn connect(
            config: &LogicalDatabaseConfig,
            _connect_timeout: Duration,
        ) -> GatewayResult<Self> {
            Err(GatewayError::configuration(
                &config.name,
                "Hive support is not compiled in; rebuild with `--features hive`",
            ))
        }
    }

    #[async_trait]
    impl BackendConnection for HiveBackend {
        fn backend(&self) -> BackendType {
            match *self {}
        }

        async fn execute(&mut self, _sql: &str) -> GatewayResult<QueryResult> {
            match *self {}
        }

        async fn close(self: Box<Self>) -> GatewayResult<()> {
            match *self {}
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::error::ErrorKind;

        #[tokio::test]
        async fn test_connect_without_feature_is_fatal() {
            let config = LogicalDatabaseConfig {
                name: "lake".to_string(),
                backend_type: "hive".to_string(),
                ..Default::default()
            };
            let err = HiveBackend::connect(&config, Duration::from_secs(1))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Connection);
            assert!(!err.is_retryable());
            assert!(err.to_string().contains("not compiled in"));
        }
    }
}
