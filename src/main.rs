//! SQL Gateway - Main entry point.

use sql_gateway::auth::AuthConfig;
use sql_gateway::config::Config;
use sql_gateway::db::{ConnectionRegistry, DriverConnector, QueryExecutor, RetryPolicy};
use sql_gateway::output::ResultStore;
use sql_gateway::transport::{AppState, HttpServer};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    if let Err(msg) = config.validate() {
        eprintln!("Error: {}", msg);
        std::process::exit(1);
    }

    // Invalid JSON aborts startup
    let databases = match config.database_configs() {
        Ok(databases) => databases,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            eprintln!("DATABASE_CONFIGS must be a JSON object, for example:");
            eprintln!(
                r#"  {{"mysql": {{"type": "mysql", "host": "localhost", "port": 3306, "user": "app", "password": "secret", "database": "sales"}}}}"#
            );
            std::process::exit(1);
        }
    };

    info!(
        databases = ?databases.names(),
        "Starting SQL gateway v{}",
        env!("CARGO_PKG_VERSION")
    );
    if databases.is_empty() {
        warn!("No databases configured; every query will fail with ConfigNotFoundError");
    }

    let auth = AuthConfig::from_tokens(config.api_keys.clone())?;
    if auth.is_enabled() {
        info!(keys = auth.token_count(), "API key authentication enabled");
    } else {
        warn!("No API key configured; /sql/query is unauthenticated");
    }

    let connector = Arc::new(DriverConnector::new(config.connect_timeout_duration())?);
    let registry = Arc::new(ConnectionRegistry::new(
        databases,
        connector,
        config.connection_timeout_duration(),
    ));
    let executor = Arc::new(QueryExecutor::new(
        registry,
        RetryPolicy::new(config.max_attempts, config.retry_backoff_duration()),
    ));

    let store = Arc::new(ResultStore::new(
        config.data_dir.clone(),
        config.file_expiry_duration(),
    ));
    let cleanup = Arc::clone(&store).start_cleanup_task(config.cleanup_interval_duration());

    let server = HttpServer::new(
        AppState { executor, store },
        Arc::new(auth),
        &config.http_host,
        config.http_port,
    );
    let result = server.run().await;
    cleanup.abort();

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
