//! Local filesystem persistence for the store state.
//!
//! Persists the full [`StoreState`] as JSON for development and
//! single-node deployments. Writes are atomic (temp file + rename) so a
//! crash mid-write never corrupts the previous snapshot. Production
//! deployments with shared state would implement [`SnapshotStorage`]
//! against a database instead.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── config.toml      # Subsystem configuration
//! └── state.json       # Persisted StoreState snapshot
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::store::StoreState;

/// Trait for store state persistence backends.
#[async_trait]
pub trait SnapshotStorage: Send + Sync {
    /// Persist the full store state.
    async fn save_state(&self, state: &StoreState) -> Result<()>;

    /// Load the persisted store state, or None on first run.
    async fn load_state(&self) -> Result<Option<StoreState>>;
}

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SnapshotStorage for LocalStorage {
    async fn save_state(&self, state: &StoreState) -> Result<()> {
        self.write_json("state.json", state).await?;
        log::debug!(
            "Persisted state: {} records, {} queue entries, {} history rows",
            state.records.len(),
            state.queue_entries.len(),
            state.history.len()
        );
        Ok(())
    }

    async fn load_state(&self) -> Result<Option<StoreState>> {
        let state = self.read_json::<StoreState>("state.json").await?;
        if state.is_none() {
            log::info!("No persisted state found; starting empty");
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_and_read() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        storage.write_bytes("test.txt", b"hello").await.unwrap();
        let data = storage.read_bytes("test.txt").await.unwrap();
        assert_eq!(data, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn test_read_nonexistent() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let data = storage.read_bytes("nope.txt").await.unwrap();
        assert!(data.is_none());
    }

    #[tokio::test]
    async fn test_state_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        assert!(storage.load_state().await.unwrap().is_none());

        let state = StoreState {
            next_entry_id: 7,
            ..StoreState::default()
        };
        storage.save_state(&state).await.unwrap();

        let loaded = storage.load_state().await.unwrap().unwrap();
        assert_eq!(loaded.next_entry_id, 7);
    }
}
