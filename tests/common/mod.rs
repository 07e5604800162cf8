//! Scripted in-memory backend shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use sql_gateway::config::DatabaseConfigs;
use sql_gateway::db::{BackendConnection, Connector, Liveness};
use sql_gateway::error::{GatewayError, GatewayResult};
use sql_gateway::models::{BackendType, LogicalDatabaseConfig, QueryResult, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Statement the fake treats as having no result set.
pub const NO_RESULT_SQL: &str = "CREATE TABLE t (id INT)";

/// Counters and failure scripts observed by every fake connection.
#[derive(Debug, Default)]
pub struct FakeState {
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub executes: AtomicUsize,
    pub probes: AtomicUsize,
    failing_connects: AtomicUsize,
    failing_executes: AtomicUsize,
    dead_probes: AtomicUsize,
    pub close_fails: AtomicBool,
}

impl FakeState {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn executes(&self) -> usize {
        self.executes.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Debug, Default)]
pub struct FakeConnector {
    pub state: Arc<FakeState>,
    connect_delays: HashMap<String, Duration>,
    execute_delays: HashMap<String, Duration>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_delay(mut self, name: &str, delay: Duration) -> Self {
        self.connect_delays.insert(name.to_string(), delay);
        self
    }

    pub fn with_execute_delay(mut self, name: &str, delay: Duration) -> Self {
        self.execute_delays.insert(name.to_string(), delay);
        self
    }

    pub fn fail_next_connects(&self, n: usize) {
        self.state.failing_connects.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_executes(&self, n: usize) {
        self.state.failing_executes.store(n, Ordering::SeqCst);
    }

    pub fn report_dead_probes(&self, n: usize) {
        self.state.dead_probes.store(n, Ordering::SeqCst);
    }

    pub fn fail_closes(&self) {
        self.state.close_fails.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        config: &LogicalDatabaseConfig,
    ) -> GatewayResult<Box<dyn BackendConnection>> {
        let backend = config.backend()?;
        if let Some(delay) = self.connect_delays.get(&config.name) {
            tokio::time::sleep(*delay).await;
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.state.failing_connects) {
            return Err(GatewayError::connection(
                "Connection refused",
                "Check that the server is running",
            ));
        }
        Ok(Box::new(FakeConnection {
            backend,
            state: Arc::clone(&self.state),
            execute_delay: self.execute_delays.get(&config.name).copied(),
        }))
    }
}

pub struct FakeConnection {
    backend: BackendType,
    state: Arc<FakeState>,
    execute_delay: Option<Duration>,
}

#[async_trait]
impl BackendConnection for FakeConnection {
    fn backend(&self) -> BackendType {
        self.backend
    }

    async fn execute(&mut self, sql: &str) -> GatewayResult<QueryResult> {
        if let Some(delay) = self.execute_delay {
            tokio::time::sleep(delay).await;
        }
        self.state.executes.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.state.failing_executes) {
            return Err(GatewayError::query("Lost connection to server during query", None));
        }
        if sql == NO_RESULT_SQL {
            return Ok(QueryResult::empty());
        }
        Ok(QueryResult::new(vec!["1".to_string()], vec![vec![Value::Int(1)]]))
    }

    async fn probe(&mut self) -> Liveness {
        if !self.backend.supports_ping() {
            return Liveness::Unsupported;
        }
        self.state.probes.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.state.dead_probes) {
            Liveness::Dead("server has gone away".to_string())
        } else {
            Liveness::Alive
        }
    }

    async fn close(self: Box<Self>) -> GatewayResult<()> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        if self.state.close_fails.load(Ordering::SeqCst) {
            return Err(GatewayError::connection("Broken pipe", "Reconnect"));
        }
        Ok(())
    }
}

pub fn db(name: &str, backend_type: &str) -> LogicalDatabaseConfig {
    LogicalDatabaseConfig {
        name: name.to_string(),
        backend_type: backend_type.to_string(),
        host: Some("db.internal".to_string()),
        port: Some(3306),
        user: Some("app".to_string()),
        ..Default::default()
    }
}

/// `mysql` and `warehouse` (presto), plus `lake` (hive).
pub fn sample_configs() -> DatabaseConfigs {
    DatabaseConfigs::from_configs(vec![
        db("mysql", "mysql"),
        db("warehouse", "presto"),
        db("lake", "hive"),
    ])
}
