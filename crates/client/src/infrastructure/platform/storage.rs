//! Settings stores: a JSON file in the platform config dir, or process memory.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use directories::ProjectDirs;

use crate::ports::outbound::{StorageError, StorageProvider};

const STORAGE_FILE: &str = "settings.json";

type Entries = BTreeMap<String, String>;

/// Settings persisted as one JSON object.
///
/// Every change rewrites the whole file through a temporary sibling and a
/// rename, and only updates the in-memory view once the rename succeeded.
/// The file lives at:
/// - Linux: ~/.config/robodeck/settings.json
/// - macOS: ~/Library/Application Support/io.robodeck.robodeck/settings.json
/// - Windows: %APPDATA%\robodeck\robodeck\config\settings.json
#[derive(Clone)]
pub struct FileStorage {
    path: PathBuf,
    entries: Arc<RwLock<Entries>>,
    // Serialises read-modify-write cycles
    writer: Arc<Mutex<()>>,
}

impl Default for FileStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl FileStorage {
    /// Settings file in the platform config directory.
    pub fn new() -> Self {
        let path = ProjectDirs::from("io", "robodeck", "robodeck")
            .map(|dirs| dirs.config_dir().join(STORAGE_FILE))
            .unwrap_or_else(|| PathBuf::from(STORAGE_FILE));
        Self::with_path(path)
    }

    /// Settings file at `path`. A missing or unreadable file starts empty.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = read_entries(&path);
        tracing::debug!(path = %path.display(), entries = entries.len(), "Settings storage opened");

        Self {
            path,
            entries: Arc::new(RwLock::new(entries)),
            writer: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&self, change: impl FnOnce(&mut Entries) -> bool) -> Result<(), StorageError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let mut next = self.snapshot();
        if !change(&mut next) {
            return Ok(());
        }
        self.write_file(&next)?;

        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = next;
        Ok(())
    }

    fn snapshot(&self) -> Entries {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn write_file(&self, entries: &Entries) -> Result<(), StorageError> {
        let data = serde_json::to_vec_pretty(entries)?;
        let staging = self.path.with_extension("json.tmp");

        let written = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::write(&staging, &data))
            .and_then(|()| fs::rename(&staging, &self.path));

        written.map_err(|source| {
            let _ = fs::remove_file(&staging);
            tracing::error!(path = %self.path.display(), error = %source, "Settings not saved");
            StorageError::Write {
                path: self.path.clone(),
                source,
            }
        })
    }
}

fn read_entries(path: &Path) -> Entries {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Entries::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Settings file unreadable, starting empty");
            return Entries::new();
        }
    };
    serde_json::from_str(&data).unwrap_or_else(|e| {
        tracing::warn!(path = %path.display(), error = %e, "Settings file corrupt, starting empty");
        Entries::new()
    })
}

impl StorageProvider for FileStorage {
    fn save(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string()).as_deref() != Some(value)
        })
    }

    fn load(&self, key: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.update(|entries| entries.remove(key).is_some())
    }
}

/// Process-local storage, for headless runs and tests
#[derive(Clone, Default)]
pub struct MemoryStorage {
    values: Arc<RwLock<Entries>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageProvider for MemoryStorage {
    fn save(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn load(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}
