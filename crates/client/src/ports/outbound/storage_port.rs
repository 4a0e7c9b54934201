//! Persistent key-value storage port

use std::path::PathBuf;

use thiserror::Error;

/// A settings change that did not reach persistent storage.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to write settings to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode settings: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Persistent storage abstraction (file-based on desktop, in-memory in tests)
///
/// Writes are durable once they return `Ok`; a failed write leaves the
/// previously stored value in place.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait StorageProvider: Send + Sync {
    /// Save a string value with the given key
    fn save(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Load a string value by key, returns None if not found
    fn load(&self, key: &str) -> Option<String>;

    /// Remove a value by key
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Storage key constants
///
/// Kept next to the port since they define which entries other consoles
/// sharing the same store will read.
pub mod storage_keys {
    pub const ROSBRIDGE_URL: &str = "rosbridge_url";
}
