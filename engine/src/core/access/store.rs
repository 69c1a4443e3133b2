//! Access grant persistence.
//!
//! Storage location for the file-backed store: {data_dir}/bookmarks.json

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{AccessError, AccessGrant, AccessResult};

/// Grant file name
pub const BOOKMARKS_FILE: &str = "bookmarks.json";

/// Lock file name (advisory lock to prevent concurrent writers)
pub const BOOKMARKS_LOCK_FILE: &str = "bookmarks.json.lock";

const BOOKMARKS_VERSION: u32 = 1;

/// Persisted grant storage keyed by access key
pub trait BookmarkStore: Send + Sync {
    fn load(&self, key: &str) -> AccessResult<Option<AccessGrant>>;
    fn save(&self, key: &str, grant: &AccessGrant) -> AccessResult<()>;
    /// Returns whether a grant was present
    fn remove(&self, key: &str) -> AccessResult<bool>;
}

/// In-memory grant store for tests and throwaway sessions
#[derive(Default)]
pub struct MemoryBookmarkStore {
    grants: Mutex<HashMap<String, AccessGrant>>,
}

impl MemoryBookmarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn grants(&self) -> std::sync::MutexGuard<'_, HashMap<String, AccessGrant>> {
        self.grants
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl BookmarkStore for MemoryBookmarkStore {
    fn load(&self, key: &str) -> AccessResult<Option<AccessGrant>> {
        Ok(self.grants().get(key).cloned())
    }

    fn save(&self, key: &str, grant: &AccessGrant) -> AccessResult<()> {
        self.grants().insert(key.to_string(), grant.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> AccessResult<bool> {
        Ok(self.grants().remove(key).is_some())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookmarksFile {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    grants: HashMap<String, AccessGrant>,
}

/// JSON-file grant store with atomic writes
pub struct FileBookmarkStore {
    path: PathBuf,
}

impl FileBookmarkStore {
    /// Create a store inside `data_dir`
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(BOOKMARKS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(BOOKMARKS_LOCK_FILE)
    }

    fn with_lock<T>(
        &self,
        exclusive: bool,
        op: impl FnOnce() -> AccessResult<T>,
    ) -> AccessResult<T> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())?;

        if exclusive {
            fs2::FileExt::lock_exclusive(&lock_file)?;
        } else {
            fs2::FileExt::lock_shared(&lock_file)?;
        }

        let result = op();

        if let Err(e) = fs2::FileExt::unlock(&lock_file) {
            warn!("Failed to unlock bookmarks lock file: {}", e);
        }

        result
    }

    fn read_file(&self) -> AccessResult<BookmarksFile> {
        if !self.path.exists() {
            return Ok(BookmarksFile::default());
        }

        let content = fs::read_to_string(&self.path)?;
        match serde_json::from_str::<BookmarksFile>(&content) {
            Ok(file) => Ok(file),
            Err(e) => {
                // A corrupt file only costs the user a re-pick.
                warn!("Discarding unreadable bookmarks file: {}", e);
                Ok(BookmarksFile::default())
            }
        }
    }

    fn write_file(&self, file: &BookmarksFile) -> AccessResult<()> {
        let content = serde_json::to_string_pretty(file)
            .map_err(|e| AccessError::Store(format!("Failed to serialize bookmarks: {e}")))?;

        let temp_path = self.path.with_extension("json.tmp");
        let mut tmp = fs::File::create(&temp_path)?;
        tmp.write_all(content.as_bytes())?;
        tmp.sync_all()?;

        if cfg!(windows) && self.path.exists() {
            // rename does not overwrite on Windows
            fs::remove_file(&self.path)?;
        }
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    fn modify<T>(&self, op: impl FnOnce(&mut BookmarksFile) -> T) -> AccessResult<T> {
        self.with_lock(true, || {
            let mut file = self.read_file()?;
            let result = op(&mut file);
            file.version = BOOKMARKS_VERSION;
            self.write_file(&file)?;
            Ok(result)
        })
    }
}

impl BookmarkStore for FileBookmarkStore {
    fn load(&self, key: &str) -> AccessResult<Option<AccessGrant>> {
        self.with_lock(false, || Ok(self.read_file()?.grants.get(key).cloned()))
    }

    fn save(&self, key: &str, grant: &AccessGrant) -> AccessResult<()> {
        self.modify(|file| {
            file.grants.insert(key.to_string(), grant.clone());
        })?;
        info!("Saved access grant '{}' to {:?}", key, self.path);
        Ok(())
    }

    fn remove(&self, key: &str) -> AccessResult<bool> {
        self.modify(|file| file.grants.remove(key).is_some())
    }
}
