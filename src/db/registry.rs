//! Connection registry: one live connection per logical database.
//!
//! # Locking
//!
//! - The name → slot map sits behind a `RwLock` that is only held long enough
//!   to look up or insert a slot, never across connect or execute.
//! - Each slot is an `Arc<tokio::sync::Mutex<Option<RegistryEntry>>>`. The
//!   staleness check, liveness probe, close and reconnect for one name all run
//!   under that name's slot lock, so two callers can never both observe a
//!   stale connection and both close it.
//! - A [`ConnectionLease`] owns the slot lock until dropped. Different names
//!   never contend; callers of the same name queue on the slot.
//!
//! # Lifecycle
//!
//! `Absent → Connecting → Live → {Stale, Dead} → Absent`. A stale entry
//! (idle longer than the connection timeout) or one failing its liveness probe
//! is closed and replaced on the next acquire. Close errors are logged and
//! discarded.

use crate::config::DatabaseConfigs;
use crate::db::driver::{BackendConnection, Connector, Liveness};
use crate::error::{GatewayError, GatewayResult};
use crate::models::{BackendType, QueryResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How long `close_all` waits for a leased slot before leaving it behind.
/// A request stuck inside a backend call keeps its lease indefinitely.
pub const CLOSE_ALL_SLOT_WAIT: Duration = Duration::from_secs(5);

/// Process-wide connection identity, for logs and tests.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A live connection owned by the registry.
pub struct RegistryEntry {
    name: String,
    connection: Box<dyn BackendConnection>,
    last_used_at: Instant,
    backend: BackendType,
    connection_id: u64,
}

impl RegistryEntry {
    fn new(name: &str, connection: Box<dyn BackendConnection>) -> Self {
        let backend = connection.backend();
        Self {
            name: name.to_string(),
            connection,
            last_used_at: Instant::now(),
            backend,
            connection_id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn touch(&mut self) {
        self.last_used_at = Instant::now();
    }

    fn is_stale(&self, timeout: Duration) -> bool {
        self.last_used_at.elapsed() > timeout
    }

    /// Best-effort close: errors are logged, never propagated.
    async fn close(self, reason: &str) {
        info!(
            database = %self.name,
            connection_id = self.connection_id,
            reason,
            "Closing connection"
        );
        if let Err(e) = self.connection.close().await {
            warn!(
                database = %self.name,
                connection_id = self.connection_id,
                error = %e,
                "Error while closing connection (ignored)"
            );
        }
    }
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("name", &self.name)
            .field("backend", &self.backend)
            .field("connection_id", &self.connection_id)
            .field("last_used_at", &self.last_used_at)
            .finish()
    }
}

type Slot = Arc<Mutex<Option<RegistryEntry>>>;

/// Exclusive access to the live connection of one logical database.
///
/// Holds the name's slot lock; drop it before sleeping or doing unrelated work.
pub struct ConnectionLease {
    guard: OwnedMutexGuard<Option<RegistryEntry>>,
    connection_id: u64,
    backend: BackendType,
}

impl ConnectionLease {
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn backend(&self) -> BackendType {
        self.backend
    }

    /// Run a statement on the leased connection. Refreshes `last_used_at` on
    /// success only.
    pub async fn execute(&mut self, sql: &str) -> GatewayResult<QueryResult> {
        let entry = self.guard.as_mut().ok_or_else(|| {
            GatewayError::internal(format!(
                "connection {} was released before use",
                self.connection_id
            ))
        })?;
        let result = entry.connection.execute(sql).await?;
        entry.touch();
        Ok(result)
    }

    /// Close the connection and empty the slot.
    pub async fn invalidate(mut self) {
        if let Some(entry) = self.guard.take() {
            entry.close("invalidated").await;
        }
    }
}

impl std::fmt::Debug for ConnectionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLease")
            .field("entry", &*self.guard)
            .finish()
    }
}

/// Owns every live backend connection, keyed by logical database name.
pub struct ConnectionRegistry {
    configs: DatabaseConfigs,
    connector: Arc<dyn Connector>,
    connection_timeout: Duration,
    slots: RwLock<HashMap<String, Slot>>,
}

impl ConnectionRegistry {
    pub fn new(
        configs: DatabaseConfigs,
        connector: Arc<dyn Connector>,
        connection_timeout: Duration,
    ) -> Self {
        Self {
            configs,
            connector,
            connection_timeout,
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn configs(&self) -> &DatabaseConfigs {
        &self.configs
    }

    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    /// Get or create the slot for a name.
    async fn slot(&self, name: &str) -> Slot {
        {
            let slots = self.slots.read().await;
            if let Some(slot) = slots.get(name) {
                return Arc::clone(slot);
            }
        }
        let mut slots = self.slots.write().await;
        // Double-check after acquiring write lock
        Arc::clone(
            slots
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(None))),
        )
    }

    /// Return a live connection for `name`, recycling stale or dead ones and
    /// connecting when none exists.
    ///
    /// Unknown names fail with `ConfigNotFound` before any connect attempt.
    /// Connect errors are returned as-is.
    pub async fn acquire(&self, name: &str) -> GatewayResult<ConnectionLease> {
        let config = self.configs.get(name)?;
        let slot = self.slot(name).await;
        let mut guard = slot.lock_owned().await;

        if let Some(entry) = guard.as_mut() {
            if entry.is_stale(self.connection_timeout) {
                warn!(
                    database = %name,
                    connection_id = entry.connection_id,
                    idle_secs = entry.last_used_at.elapsed().as_secs(),
                    "Connection idle past timeout, recycling"
                );
                if let Some(stale) = guard.take() {
                    stale.close("stale").await;
                }
            } else {
                match entry.connection.probe().await {
                    Liveness::Alive | Liveness::Unsupported => {
                        entry.touch();
                        debug!(database = %name, connection_id = entry.connection_id, "Reusing connection");
                        let (connection_id, backend) = (entry.connection_id, entry.backend);
                        return Ok(ConnectionLease {
                            guard,
                            connection_id,
                            backend,
                        });
                    }
                    Liveness::Dead(reason) => {
                        warn!(
                            database = %name,
                            connection_id = entry.connection_id,
                            reason = %reason,
                            "Liveness probe failed, reconnecting"
                        );
                        if let Some(dead) = guard.take() {
                            dead.close("liveness probe failed").await;
                        }
                    }
                }
            }
        }

        let connection = self.connector.connect(&config).await?;
        let entry = RegistryEntry::new(name, connection);
        info!(
            database = %name,
            backend = %entry.backend,
            connection_id = entry.connection_id,
            "Connected"
        );
        let (connection_id, backend) = (entry.connection_id, entry.backend);
        *guard = Some(entry);
        Ok(ConnectionLease {
            guard,
            connection_id,
            backend,
        })
    }

    /// Close and remove the entry for `name`, if any.
    pub async fn invalidate(&self, name: &str) {
        let slot = {
            let slots = self.slots.read().await;
            slots.get(name).map(Arc::clone)
        };
        if let Some(slot) = slot {
            let entry = slot.lock().await.take();
            if let Some(entry) = entry {
                entry.close("invalidated").await;
            }
        }
    }

    /// Close every connection. Leaves the registry empty even when individual
    /// closes fail. Slots still leased after [`CLOSE_ALL_SLOT_WAIT`] are
    /// skipped; their connection is dropped with the lease.
    pub async fn close_all(&self) {
        // Drain under lock, close outside lock
        let drained: Vec<(String, Slot)> = {
            let mut slots = self.slots.write().await;
            slots.drain().collect()
        };

        let mut closed = 0usize;
        let mut skipped = 0usize;
        for (name, slot) in drained {
            let entry = match tokio::time::timeout(CLOSE_ALL_SLOT_WAIT, slot.lock()).await {
                Ok(mut guard) => guard.take(),
                Err(_) => {
                    warn!(
                        database = %name,
                        wait_secs = CLOSE_ALL_SLOT_WAIT.as_secs(),
                        "Connection still in use, skipping close"
                    );
                    skipped += 1;
                    continue;
                }
            };
            if let Some(entry) = entry {
                entry.close("shutdown").await;
                closed += 1;
            }
        }
        info!(closed, skipped, "Closed all connections");
    }

    /// Number of logical databases with a live entry. Entries leased at the
    /// moment of the call count as live.
    pub async fn entry_count(&self) -> usize {
        let slots = self.slots.read().await;
        slots
            .values()
            .filter(|slot| match slot.try_lock() {
                Ok(guard) => guard.is_some(),
                Err(_) => true,
            })
            .count()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("databases", &self.configs.names())
            .field("connection_timeout", &self.connection_timeout)
            .finish()
    }
}
