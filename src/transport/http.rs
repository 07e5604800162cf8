//! HTTP transport for the SQL gateway.
//!
//! Routes:
//! - `GET /health` (open)
//! - `POST /sql/query` (bearer auth)
//! - `GET /sql/preview/{file}` (open)

use crate::auth::{AuthConfig, auth_middleware};
use crate::db::QueryExecutor;
use crate::error::{GatewayError, GatewayResult};
use crate::output::{OutputType, ResultStore, format_result, preview_url};
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

pub const DEFAULT_DB_NAME: &str = "mysql";

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub executor: Arc<QueryExecutor>,
    pub store: Arc<ResultStore>,
}

/// Body of `POST /sql/query`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    /// Logical database name. `type` is accepted for older clients.
    #[serde(alias = "type", default = "default_db_name")]
    pub db_name: String,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub output_type: OutputType,
}

fn default_db_name() -> String {
    DEFAULT_DB_NAME.to_string()
}

/// Successful query response: either a stored file or an inline result.
#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// Build the application router.
pub fn router(state: AppState, auth: Arc<AuthConfig>) -> Router {
    let protected = Router::new()
        .route("/sql/query", post(query_handler))
        .route_layer(middleware::from_fn_with_state(auth, auth_middleware));

    Router::new()
        .route("/health", get(health_handler))
        .route("/sql/preview/{file}", get(preview_handler))
        .merge(protected)
        .with_state(state)
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "services": { "sql": "ok" }
    }))
}

async fn query_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Response {
    let sql = match request.sql.as_deref() {
        Some(sql) if !sql.trim().is_empty() => sql,
        _ => return bad_request("SQL query is required"),
    };

    match run_query(&state, &request.db_name, sql, request.output_type).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            error!(database = %request.db_name, error = %e, "Query request failed");
            e.into_response()
        }
    }
}

async fn run_query(
    state: &AppState,
    db_name: &str,
    sql: &str,
    output_type: OutputType,
) -> GatewayResult<QueryResponse> {
    let result = state.executor.execute(db_name, sql).await?;
    let content = format_result(&result, output_type)?;

    match output_type.file_kind() {
        Some(kind) => {
            let file_id = state.store.save(&content, kind).await?;
            Ok(QueryResponse {
                success: true,
                preview_url: Some(preview_url(&file_id, kind)),
                result_id: Some(file_id),
                result: None,
            })
        }
        None => Ok(QueryResponse {
            success: true,
            result_id: None,
            preview_url: None,
            result: Some(content),
        }),
    }
}

async fn preview_handler(State(state): State<AppState>, Path(file): Path<String>) -> Response {
    match state.store.read(&file).await {
        Ok((content, kind)) => ([(header::CONTENT_TYPE, kind.content_type())], content).into_response(),
        Err(e) => {
            if !matches!(e, GatewayError::ResultNotFound { .. }) {
                error!(file = %file, error = %e, "Failed to read result file");
            }
            e.into_response()
        }
    }
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({
            "success": false,
            "error": message,
            "error_type": "ValidationError",
        })),
    )
        .into_response()
}

/// HTTP server with graceful shutdown.
pub struct HttpServer {
    state: AppState,
    auth: Arc<AuthConfig>,
    host: String,
    port: u16,
}

impl HttpServer {
    pub fn new(state: AppState, auth: Arc<AuthConfig>, host: impl Into<String>, port: u16) -> Self {
        Self {
            state,
            auth,
            host: host.into(),
            port,
        }
    }

    /// Get the bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Serve until SIGINT/SIGTERM, then close every backend connection once.
    pub async fn run(self) -> GatewayResult<()> {
        let bind_addr = self.bind_addr();
        let registry = Arc::clone(self.state.executor.registry());
        let app = router(self.state, self.auth);

        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            GatewayError::internal(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;
        info!("SQL gateway listening on {}", bind_addr);

        // In-flight queries may block on a backend indefinitely, so force exit
        // after a timeout once shutdown has started
        const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

        let shutdown_notify = Arc::new(tokio::sync::Notify::new());
        let shutdown_notify_clone = shutdown_notify.clone();

        let shutdown_signal = async move {
            wait_for_signal().await;
            shutdown_notify_clone.notify_one();
        };

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);

        let served = tokio::select! {
            result = server => {
                match result {
                    Ok(()) => {
                        info!("HTTP server stopped");
                        Ok(())
                    }
                    Err(e) => {
                        error!(error = %e, "HTTP server error");
                        Err(GatewayError::internal(format!("HTTP server error: {}", e)))
                    }
                }
            }
            _ = async {
                shutdown_notify.notified().await;
                info!(
                    timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
                    "Waiting for requests to finish (send signal again to force exit)..."
                );

                tokio::select! {
                    _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => {
                        warn!("Graceful shutdown timeout, forcing exit");
                    }
                    _ = wait_for_signal() => {
                        warn!("Received second signal, forcing immediate exit");
                    }
                }
            } => Ok(()),
        };

        info!("Closing database connections");
        registry.close_all().await;

        served
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_signal() {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
