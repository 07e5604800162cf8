//! Query execution engine.
//!
//! `execute(name, sql)` runs acquire → execute → collect under a bounded retry
//! loop:
//! - every failed attempt invalidates the name's connection, so the next
//!   attempt starts from a fresh connect
//! - the name's slot lock is released before the backoff sleep
//! - caller and configuration mistakes fail immediately, everything else is
//!   retried until attempts run out

use crate::config::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_BACKOFF_MS};
use crate::db::registry::ConnectionRegistry;
use crate::error::{GatewayError, GatewayResult};
use crate::models::QueryResult;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Bounded retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_ATTEMPTS,
            Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
        )
    }
}

/// Query executor that handles database query execution.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    registry: Arc<ConnectionRegistry>,
    policy: RetryPolicy,
}

impl QueryExecutor {
    pub fn new(registry: Arc<ConnectionRegistry>, policy: RetryPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Execute a statement against a logical database.
    ///
    /// Returns the full result or one error describing the last failure and
    /// the attempt count. Partial results are never returned.
    pub async fn execute(&self, name: &str, sql: &str) -> GatewayResult<QueryResult> {
        // Unknown names are a caller error: zero attempts
        if !self.registry.configs().contains(name) {
            return Err(GatewayError::config_not_found(name));
        }

        let start = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            debug!(database = %name, attempt, sql = %sql, "Executing statement");

            let err = match self.attempt(name, sql).await {
                Ok(result) => {
                    debug!(
                        database = %name,
                        attempt,
                        rows = result.row_count(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Statement completed"
                    );
                    return Ok(result);
                }
                Err(e) => e,
            };

            if !err.is_retryable() {
                return Err(err);
            }

            if attempt >= self.policy.max_attempts {
                warn!(database = %name, attempts = attempt, error = %err, "Giving up");
                return Err(GatewayError::retries_exhausted(attempt, err));
            }

            warn!(
                database = %name,
                attempt,
                max_attempts = self.policy.max_attempts,
                error = %err,
                "Attempt failed, retrying"
            );
            tokio::time::sleep(self.policy.backoff).await;
        }
    }

    /// One attempt. The lease, and with it the slot lock, is gone when this
    /// returns.
    async fn attempt(&self, name: &str, sql: &str) -> GatewayResult<QueryResult> {
        let mut lease = match self.registry.acquire(name).await {
            Ok(lease) => lease,
            Err(e) => {
                // Connect failed; nothing live to close but keep the slot empty
                self.registry.invalidate(name).await;
                return Err(e);
            }
        };

        match lease.execute(sql).await {
            Ok(result) => Ok(result),
            Err(e) => {
                lease.invalidate().await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff, Duration::from_secs(1));
    }

    #[test]
    fn test_retry_policy_needs_one_attempt() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.max_attempts, 1);
    }
}
