//! Directory Access Module
//!
//! Persisted access grants for user-picked directories and the scoped
//! acquisition discipline around them.
//!
//! A grant records the directory root together with an identity fingerprint
//! taken when the user picked it. Resolving a grant checks that the same
//! directory is still there; a moved, replaced or deleted directory makes
//! the grant stale. Callers that observe staleness invalidate the grant so
//! the user is asked to pick the directory again.

mod store;

pub use store::{BookmarkStore, FileBookmarkStore, MemoryBookmarkStore};

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::AccessKey;

/// Access-layer errors
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("access grant is stale: {0}")]
    Stale(AccessKey),

    #[error("access denied: {0}")]
    Denied(String),

    #[error("no access grant for key: {0}")]
    Missing(AccessKey),

    #[error("grant store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AccessResult<T> = Result<T, AccessError>;

/// Identity of a directory at grant time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirFingerprint {
    pub device: u64,
    pub inode: u64,
}

impl DirFingerprint {
    #[cfg(unix)]
    fn of(metadata: &std::fs::Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            device: metadata.dev(),
            inode: metadata.ino(),
        })
    }

    #[cfg(not(unix))]
    fn of(_metadata: &std::fs::Metadata) -> Option<Self> {
        None
    }
}

/// Persisted grant for one picked directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrant {
    /// Directory the user picked
    pub root: PathBuf,
    /// Identity at grant time; `None` where the platform has no stable id
    pub fingerprint: Option<DirFingerprint>,
    /// When the grant was recorded
    pub granted_at: DateTime<Utc>,
}

/// Grants access to stored directories for the duration of one operation.
#[derive(Clone)]
pub struct AccessManager {
    store: Arc<dyn BookmarkStore>,
    active: Arc<AtomicUsize>,
}

impl AccessManager {
    pub fn new(store: Arc<dyn BookmarkStore>) -> Self {
        Self {
            store,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Record a grant for `root` under `key`, replacing any previous one.
    pub fn grant(&self, key: &str, root: &Path) -> AccessResult<AccessGrant> {
        let metadata = std::fs::metadata(root).map_err(|e| map_io(key, e))?;
        if !metadata.is_dir() {
            return Err(AccessError::Denied(format!(
                "not a directory: {}",
                root.display()
            )));
        }

        let grant = AccessGrant {
            root: root.to_path_buf(),
            fingerprint: DirFingerprint::of(&metadata),
            granted_at: Utc::now(),
        };
        self.store.save(key, &grant)?;
        debug!("Recorded access grant {} -> {}", key, root.display());
        Ok(grant)
    }

    /// Resolve the grant stored under `key` into a scoped handle.
    ///
    /// The caller owns invalidation on [`AccessError::Stale`].
    pub fn acquire(&self, key: &str) -> AccessResult<ScopedAccess> {
        let grant = self
            .store
            .load(key)?
            .ok_or_else(|| AccessError::Missing(key.to_string()))?;

        let metadata = std::fs::metadata(&grant.root).map_err(|e| map_io(key, e))?;
        if !metadata.is_dir() {
            return Err(AccessError::Stale(key.to_string()));
        }
        if let (Some(recorded), Some(current)) = (grant.fingerprint, DirFingerprint::of(&metadata)) {
            if recorded != current {
                return Err(AccessError::Stale(key.to_string()));
            }
        }

        // Metadata succeeds on unreadable directories; listing does not.
        std::fs::read_dir(&grant.root).map_err(|e| map_io(key, e))?;

        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(ScopedAccess {
            key: key.to_string(),
            root: grant.root,
            active: Arc::clone(&self.active),
        })
    }

    /// Remove the grant stored under `key`.
    pub fn invalidate(&self, key: &str) {
        match self.store.remove(key) {
            Ok(true) => warn!("Invalidated stale access grant '{}'", key),
            Ok(false) => {}
            Err(e) => warn!("Failed to invalidate access grant '{}': {}", key, e),
        }
    }

    /// Current grant for `key`, if any
    pub fn grant_for(&self, key: &str) -> AccessResult<Option<AccessGrant>> {
        self.store.load(key)
    }

    /// Number of scopes currently held
    pub fn active_scopes(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

fn map_io(key: &str, err: std::io::Error) -> AccessError {
    match err.kind() {
        ErrorKind::NotFound => AccessError::Stale(key.to_string()),
        ErrorKind::PermissionDenied => AccessError::Denied(format!("{key}: {err}")),
        _ => AccessError::Io(err),
    }
}

/// A resolved grant, released on drop.
#[derive(Debug)]
pub struct ScopedAccess {
    key: AccessKey,
    root: PathBuf,
    active: Arc<AtomicUsize>,
}

impl ScopedAccess {
    /// Granted directory root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a file inside the granted directory
    pub fn resolve(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }
}

impl Drop for ScopedAccess {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        debug!("Released access scope '{}'", self.key);
    }
}
