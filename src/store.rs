//! File-backed key-value store for state that must survive process restart.
//!
//! Each key maps to one JSON file under the store root. Writes go to a
//! temporary sibling first and are renamed into place, so a crash mid-write
//! leaves the previous value intact. Malformed files are logged and read as
//! absent rather than failing the caller.

use crate::error::{Result, TrackingError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Persisted tracking state machine snapshot.
pub const KEY_TRACKING_STATE: &str = "tracking_state";
/// Persisted recovery record.
pub const KEY_RECOVERY_RECORD: &str = "recovery_record";
/// Persisted offline delivery queue.
pub const KEY_OFFLINE_QUEUE: &str = "offline_queue";
/// Last known good policy.
pub const KEY_POLICY_CACHE: &str = "policy_cache";
/// Whether the host asked for tracking to run.
pub const KEY_SERVICE_ENABLED: &str = "service_enabled";

/// On-disk key-value store.
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at [`tracker_dirs::state_dir`](crate::tracker_dirs::state_dir).
    #[must_use]
    pub fn open_default() -> Self {
        Self::new(crate::tracker_dirs::state_dir())
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    /// Read a value. Missing or malformed entries return `Ok(None)`.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.path_for(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(TrackingError::Storage(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        match serde_json::from_slice::<T>(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!("ignoring malformed state entry at {}: {e}", path.display());
                Ok(None)
            }
        }
    }

    /// Write a value atomically.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        std::fs::create_dir_all(&self.root).map_err(|e| {
            TrackingError::Storage(format!("failed to create state directory: {e}"))
        })?;

        let path = self.path_for(key);
        let tmp_path = path.with_extension("tmp");
        let json = serde_json::to_vec(value)
            .map_err(|e| TrackingError::Storage(format!("failed to serialize {key}: {e}")))?;
        std::fs::write(&tmp_path, json)
            .map_err(|e| TrackingError::Storage(format!("failed to write {key} temp file: {e}")))?;
        std::fs::rename(&tmp_path, &path)
            .map_err(|e| TrackingError::Storage(format!("failed to finalize {key}: {e}")))?;
        Ok(())
    }

    /// Delete a value. Deleting a missing key is not an error.
    pub fn remove(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TrackingError::Storage(format!("failed to delete {key}: {e}"))),
        }
    }

    /// Write, logging instead of propagating failures.
    ///
    /// Used on paths where losing one persistence write is preferable to
    /// aborting a state transition that already happened in memory.
    pub fn save_or_warn<T: Serialize>(&self, key: &str, value: &T) {
        if let Err(e) = self.save(key, value) {
            tracing::error!("cannot persist {key}: {e}");
        }
    }

    /// Delete, logging instead of propagating failures.
    pub fn remove_or_warn(&self, key: &str) {
        if let Err(e) = self.remove(key) {
            tracing::error!("cannot delete {key}: {e}");
        }
    }
}
