//! Persistent storage for contact events.
//!
//! One JSON file per peer, at `<data_dir>/events/<peer-id>.json`, holding
//! that peer's events as an array.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{ProximityError, Result};
use crate::event::{PeerId, StoredEvent};
use crate::store::{retain_recent, upsert, EventStore};

const EVENTS_DIR: &str = "events";

/// Event store backed by JSON files.
#[derive(Debug)]
pub struct JsonFileEventStore {
    data_dir: PathBuf,
    /// Serializes file mutations between writers and the sweeper.
    write_lock: Mutex<()>,
}

impl JsonFileEventStore {
    /// Create a store rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Root directory of this store.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn events_dir(&self) -> PathBuf {
        self.data_dir.join(EVENTS_DIR)
    }

    fn peer_path(&self, peer: &PeerId) -> PathBuf {
        self.events_dir().join(format!("{peer}.json"))
    }

    async fn read_file(path: &Path) -> Result<Vec<StoredEvent>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(ProximityError::PersistenceError(format!(
                "Failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    async fn write_file(path: &Path, events: &[StoredEvent]) -> Result<()> {
        if events.is_empty() {
            return match tokio::fs::remove_file(path).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            };
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(events)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await.map_err(|e| {
            ProximityError::PersistenceError(format!("Failed to write {}: {e}", tmp.display()))
        })?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for JsonFileEventStore {
    async fn get_all_for_peer(&self, peer: &PeerId) -> Result<Vec<StoredEvent>> {
        Self::read_file(&self.peer_path(peer)).await
    }

    async fn save(&self, event: StoredEvent) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.peer_path(&event.event.peer_id);
        let mut events = Self::read_file(&path).await?;
        upsert(&mut events, event);
        Self::write_file(&path, &events).await
    }

    async fn delete_older_than(&self, cutoff_ms: i64) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut entries = match tokio::fs::read_dir(self.events_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let mut events = Self::read_file(&path).await?;
            let dropped = retain_recent(&mut events, cutoff_ms);
            if dropped > 0 {
                debug!(path = %path.display(), dropped, "Pruning expired events");
                Self::write_file(&path, &events).await?;
                removed += dropped;
            }
        }
        Ok(removed)
    }
}

/// Get the default storage location.
///
/// On Linux hosts: `/var/lib/proximity/`
/// For development: the platform data dir
#[must_use]
pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/lib/proximity")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "proximity")
            .map_or_else(|| PathBuf::from("./data"), |dirs| dirs.data_dir().to_path_buf())
    }
}
