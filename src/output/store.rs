//! Result file store.
//!
//! Formatted results requested as files are written under one directory and
//! served back by name. Files older than the expiry are removed by a periodic
//! cleanup task.

use crate::error::{GatewayError, GatewayResult};
use crate::output::format::FileKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Public route prefix under which stored results are served.
pub const PREVIEW_PREFIX: &str = "/sql/preview";

#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
    expiry: Duration,
}

impl ResultStore {
    pub fn new(dir: impl Into<PathBuf>, expiry: Duration) -> Self {
        Self {
            dir: dir.into(),
            expiry,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a formatted result and return its id.
    pub async fn save(&self, content: &str, kind: FileKind) -> GatewayResult<String> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            GatewayError::storage(format!(
                "Failed to create result directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let file_id = generate_file_id();
        let path = self.dir.join(file_name(&file_id, kind));
        tokio::fs::write(&path, content).await.map_err(|e| {
            GatewayError::storage(format!("Failed to write {}: {}", path.display(), e))
        })?;

        debug!(file_id = %file_id, path = %path.display(), "Saved result file");
        Ok(file_id)
    }

    /// Read a stored result by file name (`<id>.<ext>`).
    pub async fn read(&self, name: &str) -> GatewayResult<(String, FileKind)> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(GatewayError::result_not_found(name));
        }
        let kind = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(FileKind::from_extension)
            .ok_or_else(|| GatewayError::result_not_found(name))?;

        match tokio::fs::read_to_string(self.dir.join(name)).await {
            Ok(content) => Ok((content, kind)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(GatewayError::result_not_found(name))
            }
            Err(e) => Err(GatewayError::storage(format!(
                "Failed to read {}: {}",
                name, e
            ))),
        }
    }

    /// Delete files older than the expiry. Returns how many were removed.
    ///
    /// Per-file failures are logged and skipped.
    pub async fn clean_expired(&self) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Failed to list result directory");
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut removed = 0usize;

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read result directory entry");
                    break;
                }
            };
            let path = entry.path();

            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to stat result file");
                    continue;
                }
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age <= self.expiry {
                continue;
            }

            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove expired result"),
            }
        }

        if removed > 0 {
            info!(removed, "Removed expired result files");
        }
        removed
    }

    /// Run [`clean_expired`](Self::clean_expired) every `interval`.
    pub fn start_cleanup_task(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            loop {
                interval.tick().await;
                self.clean_expired().await;
            }
        })
    }
}

/// Route under which a stored result is served.
pub fn preview_url(file_id: &str, kind: FileKind) -> String {
    format!("{}/{}", PREVIEW_PREFIX, file_name(file_id, kind))
}

fn file_name(file_id: &str, kind: FileKind) -> String {
    format!("{}.{}", file_id, kind.extension())
}

/// Millisecond timestamp plus a short random suffix.
fn generate_file_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", millis, &suffix[..8])
}
