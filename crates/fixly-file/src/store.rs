//! JSON document storage on the local filesystem.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use fixly_core::{KeyValueStorage, StorageError};

/// The on-disk document.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
    #[serde(default)]
    entries: BTreeMap<String, String>,
}

/// Key-value storage kept in a single JSON file.
///
/// Every write is a locked read-modify-write of the whole document: an
/// exclusive lock is taken on a sibling `.lock` file, the new document is
/// written to a temporary file and renamed over the old one. On Unix the
/// file is readable by its owner only.
///
/// A missing file is empty storage.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path of the JSON document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    fn open_lock(&self) -> Result<File, StorageError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())?;
        Ok(lock_file)
    }

    fn read_document(&self) -> Result<Document, StorageError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Document::default()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Document::default());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn load(&self) -> Result<Document, StorageError> {
        if !self.path.exists() {
            return Ok(Document::default());
        }
        let lock_file = self.open_lock()?;
        lock_file.lock_shared()?;
        let document = self.read_document();
        lock_file.unlock()?;
        document
    }

    /// Apply `change` under the exclusive lock. Nothing is written when it
    /// returns false.
    fn update<F>(&self, change: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool,
    {
        let lock_file = self.open_lock()?;
        lock_file.lock_exclusive()?;

        let mut document = self.read_document()?;
        if change(&mut document.entries) {
            document.updated_at = Some(Utc::now().to_rfc3339());
            self.write_document(&document)?;
        } else {
            trace!(path = %self.path.display(), "Nothing to write");
        }

        // Dropping the handle also releases the lock on the error paths above.
        lock_file.unlock()?;
        Ok(())
    }

    fn write_document(&self, document: &Document) -> Result<(), StorageError> {
        let content = serde_json::to_string_pretty(document)?;
        let temp_path = self
            .path
            .with_extension(format!("{}.tmp", Uuid::new_v4().simple()));

        let mut options = OpenOptions::new();
        options.create_new(true).write(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let written = options.open(&temp_path).and_then(|mut file| {
            file.write_all(content.as_bytes())?;
            file.sync_all()
        });
        if let Err(e) = written.and_then(|()| fs::rename(&temp_path, &self.path)) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        debug!(path = %self.path.display(), entries = document.entries.len(), "Wrote storage document");
        Ok(())
    }
}

/// Run blocking filesystem work (including lock waits) off the runtime threads.
async fn run_blocking<T, F>(work: F) -> Result<T, StorageError>
where
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StorageError::Backend {
            message: format!("storage task failed: {}", e),
        })?
}

#[async_trait]
impl KeyValueStorage for FileStorage {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let storage = self.clone();
        let key = key.to_string();
        run_blocking(move || Ok(storage.load()?.entries.remove(&key))).await
    }

    #[instrument(skip(self, value), fields(path = %self.path.display()))]
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let storage = self.clone();
        let (key, value) = (key.to_string(), value.to_string());
        run_blocking(move || {
            storage.update(|entries| {
                entries.insert(key, value);
                true
            })
        })
        .await
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let storage = self.clone();
        let key = key.to_string();
        run_blocking(move || storage.update(|entries| entries.remove(&key).is_some())).await
    }
}
