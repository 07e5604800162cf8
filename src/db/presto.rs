//! Presto backend over the coordinator REST protocol.
//!
//! A statement is submitted with `POST /v1/statement`; the coordinator answers
//! with a page that may carry columns, data and a `nextUri`. Pages are followed
//! until `nextUri` disappears. Presto has no session to validate, so a
//! "connection" is the HTTP client plus the coordinator address and headers.

use crate::db::driver::BackendConnection;
use crate::error::{GatewayError, GatewayResult};
use crate::models::{BackendType, LogicalDatabaseConfig, QueryResult, Value};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

const USER_HEADER: &str = "X-Presto-User";
const CATALOG_HEADER: &str = "X-Presto-Catalog";
const SCHEMA_HEADER: &str = "X-Presto-Schema";
const SOURCE_HEADER: &str = "X-Presto-Source";
const SOURCE: &str = "sql-gateway";

/// Build the HTTP client shared by every Presto connection.
pub fn build_http_client(connect_timeout: Duration) -> GatewayResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|e| GatewayError::internal(format!("Failed to create HTTP client: {}", e)))
}

/// One page of a statement response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementPage {
    #[serde(default)]
    next_uri: Option<String>,
    #[serde(default)]
    columns: Option<Vec<PrestoColumn>>,
    #[serde(default)]
    data: Option<Vec<Vec<serde_json::Value>>>,
    #[serde(default)]
    error: Option<PrestoError>,
}

#[derive(Debug, Deserialize)]
struct PrestoColumn {
    name: String,
    #[serde(rename = "type")]
    type_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrestoError {
    message: String,
    #[serde(default)]
    error_name: Option<String>,
}

#[derive(Debug)]
pub struct PrestoBackend {
    http: reqwest::Client,
    statement_url: Url,
    user: String,
    password: Option<String>,
    catalog: String,
    schema: String,
}

impl PrestoBackend {
    /// Validate the configuration and bind it to the shared HTTP client.
    ///
    /// No request is sent; an unreachable coordinator surfaces on first execute.
    pub fn connect(config: &LogicalDatabaseConfig, http: reqwest::Client) -> GatewayResult<Self> {
        let host = config.require_host()?;
        let port = config.require_port()?;
        let user = config.require_user()?.to_string();
        let scheme = config.http_scheme.as_deref().unwrap_or("http");
        if scheme != "http" && scheme != "https" {
            return Err(GatewayError::configuration(
                &config.name,
                format!("unsupported http_scheme '{}'", scheme),
            ));
        }

        let statement_url = Url::parse(&format!("{}://{}:{}/v1/statement", scheme, host, port))
            .map_err(|e| {
                GatewayError::configuration(&config.name, format!("invalid coordinator address: {}", e))
            })?;

        Ok(Self {
            http,
            statement_url,
            user,
            password: config.password.clone().filter(|p| !p.is_empty()),
            catalog: config.catalog_or_default().to_string(),
            schema: config.schema_or_default().to_string(),
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request
            .header(USER_HEADER, &self.user)
            .header(CATALOG_HEADER, &self.catalog)
            .header(SCHEMA_HEADER, &self.schema)
            .header(SOURCE_HEADER, SOURCE);
        match &self.password {
            Some(password) => request.basic_auth(&self.user, Some(password)),
            None => request,
        }
    }

    async fn read_page(&self, request: reqwest::RequestBuilder) -> GatewayResult<StatementPage> {
        let response = self.authorize(request).send().await.map_err(|e| {
            GatewayError::connection(
                format!("Presto request failed: {}", e),
                "Check that the Presto coordinator is running and reachable",
            )
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::connection(
                format!("Presto coordinator returned {}: {}", status, body.trim()),
                "Check coordinator health and the configured user",
            ));
        }

        response.json::<StatementPage>().await.map_err(|e| {
            GatewayError::connection(
                format!("Invalid response from Presto coordinator: {}", e),
                "Check that host and port point at a Presto coordinator",
            )
        })
    }
}

#[async_trait]
impl BackendConnection for PrestoBackend {
    fn backend(&self) -> BackendType {
        BackendType::Presto
    }

    async fn execute(&mut self, sql: &str) -> GatewayResult<QueryResult> {
        debug!(url = %self.statement_url, "Submitting Presto statement");
        let mut page = self
            .read_page(self.http.post(self.statement_url.clone()).body(sql.to_string()))
            .await?;

        let mut columns: Option<Vec<PrestoColumn>> = None;
        let mut rows = Vec::new();

        loop {
            if let Some(error) = page.error.take() {
                let message = match error.error_name {
                    Some(name) => format!("{}: {}", name, error.message),
                    None => error.message,
                };
                return Err(GatewayError::query(message, None));
            }

            if columns.is_none() {
                columns = page.columns.take();
            }
            if let Some(data) = page.data.take() {
                let types = columns.as_deref().unwrap_or(&[]);
                rows.extend(data.into_iter().map(|row| convert_row(row, types)));
            }

            let Some(next) = page.next_uri.take() else {
                break;
            };
            trace!(next_uri = %next, "Following Presto page");
            page = self.read_page(self.http.get(&next)).await?;
        }

        let columns = columns
            .unwrap_or_default()
            .into_iter()
            .map(|c| c.name)
            .collect();
        Ok(QueryResult::new(columns, rows))
    }

    async fn close(self: Box<Self>) -> GatewayResult<()> {
        Ok(())
    }
}

fn convert_row(row: Vec<serde_json::Value>, columns: &[PrestoColumn]) -> Vec<Value> {
    row.into_iter()
        .enumerate()
        .map(|(idx, cell)| {
            let type_name = columns.get(idx).map(|c| c.type_name.as_str()).unwrap_or("");
            convert_cell(cell, type_name)
        })
        .collect()
}

/// Convert one JSON cell using the declared Presto type.
fn convert_cell(cell: serde_json::Value, type_name: &str) -> Value {
    use serde_json::Value as Json;

    let base = type_name
        .split('(')
        .next()
        .unwrap_or(type_name)
        .trim()
        .to_lowercase();

    match (base.as_str(), cell) {
        (_, Json::Null) => Value::Null,
        (_, Json::Bool(b)) => Value::Bool(b),
        ("tinyint" | "smallint" | "integer" | "bigint", Json::Number(n)) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Text(n.to_string()),
        },
        ("real" | "double", Json::Number(n)) => match n.as_f64() {
            Some(f) => Value::Float(f),
            None => Value::Text(n.to_string()),
        },
        // Non-finite doubles arrive as strings
        ("real" | "double", Json::String(s)) => s
            .parse::<f64>()
            .map(Value::Float)
            .unwrap_or(Value::Text(s)),
        ("date", Json::String(s)) => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .map(Value::Date)
            .unwrap_or(Value::Text(s)),
        ("timestamp", Json::String(s)) => {
            NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S%.f")
                .map(Value::DateTime)
                .unwrap_or(Value::Text(s))
        }
        ("varbinary", Json::String(s)) => match BASE64.decode(s.as_bytes()) {
            Ok(bytes) => Value::Bytes(bytes),
            Err(_) => Value::Text(s),
        },
        (_, Json::Number(n)) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => n.as_f64().map(Value::Float).unwrap_or(Value::Text(n.to_string())),
        },
        (_, Json::String(s)) => Value::Text(s),
        // array, map, row
        (_, other) => Value::Text(other.to_string()),
    }
}
