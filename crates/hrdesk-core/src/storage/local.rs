use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use tokio::sync::broadcast;
use tracing::debug;

use super::{ChangeFeed, StorageError, StorageEvent, StorageSink};

/// Local storage file name in cache directory
pub const LOCAL_STORAGE_FILE: &str = "local_storage.json";

/// Per-origin budget browsers commonly enforce (5 MiB)
const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

/// Plain key/value mirror of the session, persisted as a JSON object.
///
/// Without a backing file the store lives in memory only.
pub struct LocalStorage {
    path: Option<PathBuf>,
    entries: Mutex<BTreeMap<String, String>>,
    quota_bytes: usize,
    feed: ChangeFeed,
}

impl LocalStorage {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(BTreeMap::new()),
            quota_bytes: DEFAULT_QUOTA_BYTES,
            feed: ChangeFeed::new("local"),
        }
    }

    /// Open (or lazily create) the storage file at `path`
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .context("Failed to read local storage file")?;
            serde_json::from_str(&contents).context("Failed to parse local storage file")?
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), keys = entries.len(), "Local storage opened");

        Ok(Self {
            path: Some(path),
            entries: Mutex::new(entries),
            quota_bytes: DEFAULT_QUOTA_BYTES,
            feed: ChangeFeed::new("local"),
        })
    }

    pub fn with_quota(mut self, quota_bytes: usize) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    #[cfg(test)]
    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.keys().cloned().collect())
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(ref path) = self.path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let contents = serde_json::to_string_pretty(entries)?;
            std::fs::write(path, contents)?;
        }
        Ok(())
    }

    fn used_bytes(entries: &BTreeMap<String, String>) -> usize {
        entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

impl StorageSink for LocalStorage {
    fn name(&self) -> &'static str {
        "local"
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;

        let existing = entries.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
        if Self::used_bytes(&entries) - existing + key.len() + value.len() > self.quota_bytes {
            return Err(StorageError::QuotaExceeded(key.to_string()));
        }

        // The file is written before the in-memory map changes
        let mut next = entries.clone();
        next.insert(key.to_string(), value.to_string());
        self.flush(&next)?;
        *entries = next;
        drop(entries);

        self.feed.publish(key, Some(value));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        if !entries.contains_key(key) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.remove(key);
        self.flush(&next)?;
        *entries = next;
        drop(entries);

        self.feed.publish(key, None);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.feed.subscribe()
    }
}
