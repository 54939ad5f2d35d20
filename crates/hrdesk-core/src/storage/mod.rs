//! Key/value storage sinks that hold the persisted session.
//!
//! Two sinks back every session:
//! - `CookieSink`: a signed cookie jar (the record a server component reads)
//! - `LocalStorage`: a plain key/value mirror for synchronous client reads
//!
//! Every sink publishes a `StorageEvent` on mutation so that other views of
//! the same storage (another tab, another process handle) can converge.

pub mod cookies;
pub mod local;

pub use cookies::{CookieOptions, CookieSink};
pub use local::LocalStorage;

use thiserror::Error;
use tokio::sync::broadcast;

/// Capacity of each sink's change feed. Slow subscribers skip ahead.
const CHANGE_FEED_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage lock poisoned")]
    Poisoned,

    #[error("Storage quota exceeded for key {0}")]
    QuotaExceeded(String),

    #[error("Invalid cookie signing key: {0}")]
    InvalidKey(String),
}

/// A mutation observed on a sink. `new_value` is `None` for removals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub sink: &'static str,
    pub key: String,
    pub new_value: Option<String>,
}

/// A string key/value store.
///
/// Implementations must treat `remove` of an absent key as success.
pub trait StorageSink: Send + Sync {
    /// Short name used in logs and events
    fn name(&self) -> &'static str;

    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Subscribe to mutations made through any handle to this sink
    fn subscribe(&self) -> broadcast::Receiver<StorageEvent>;
}

/// Broadcast helper shared by the sink implementations.
#[derive(Debug, Clone)]
pub(crate) struct ChangeFeed {
    sink: &'static str,
    tx: broadcast::Sender<StorageEvent>,
}

impl ChangeFeed {
    pub(crate) fn new(sink: &'static str) -> Self {
        let (tx, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { sink, tx }
    }

    pub(crate) fn publish(&self, key: &str, new_value: Option<&str>) {
        // No subscribers is the common case and not an error
        let _ = self.tx.send(StorageEvent {
            sink: self.sink,
            key: key.to_string(),
            new_value: new_value.map(str::to_string),
        });
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.tx.subscribe()
    }
}
