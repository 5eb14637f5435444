//! Durable flat JSON tables with atomic replace-on-write.
//!
//! Each table is one whole file rewritten on every mutation through a temp
//! file and rename, so a crash mid-write cannot corrupt it. The files are
//! shared with external tooling and may be read by a second process between
//! writes, which is why mutation never edits in place.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::warn;

// ============================================================================
// Errors
// ============================================================================

/// Errors from durable table persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to read or write a file.
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to serialize table contents.
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for durable table operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// ============================================================================
// Durable Table
// ============================================================================

/// A whole-file JSON key→value table.
///
/// Reads always go back to disk so every caller observes a consistent view;
/// there is no in-memory cache. Writes are serialized by a per-table mutex
/// (single writer at a time per underlying file).
pub struct DurableTable<V> {
    path: PathBuf,
    write_lock: Mutex<()>,
    delete_when_empty: bool,
    _value: PhantomData<fn() -> V>,
}

impl<V: Serialize + DeserializeOwned> DurableTable<V> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            delete_when_empty: false,
            _value: PhantomData,
        }
    }

    /// Remove the backing file instead of writing an empty table. Gives a
    /// cheap "is anything recorded" check via file existence.
    pub fn delete_when_empty(mut self) -> Self {
        self.delete_when_empty = true;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the table from disk. A missing or malformed file yields an empty
    /// table rather than an error.
    pub async fn load(&self) -> HashMap<String, V> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read table");
                return HashMap::new();
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(map) => map,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Malformed table, treating as empty"
                );
                HashMap::new()
            }
        }
    }

    /// Load, apply a mutation, and persist in one single-writer critical
    /// section.
    pub async fn mutate<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut HashMap<String, V>),
    {
        let _guard = self.write_lock.lock().await;
        let mut map = self.load().await;
        apply(&mut map);

        if map.is_empty() && self.delete_when_empty {
            return self.remove_file().await;
        }
        self.save_locked(&map).await
    }

    /// Read the whole table and delete the backing file (consume-once
    /// semantics, used at startup).
    pub async fn drain(&self) -> HashMap<String, V> {
        let _guard = self.write_lock.lock().await;
        let map = self.load().await;
        if let Err(e) = self.remove_file().await {
            warn!(path = %self.path.display(), error = %e, "Failed to delete drained table");
        }
        map
    }

    async fn remove_file(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }

    /// Write the table atomically: temp file in the same directory, then
    /// rename over the target. If the replace fails, fall back to a direct
    /// write rather than losing the update.
    async fn save_locked(&self, map: &HashMap<String, V>) -> Result<()> {
        let data = serde_json::to_vec_pretty(map)?;
        let tmp = self.tmp_path();

        match fs::write(&tmp, &data).await {
            Ok(()) => match fs::rename(&tmp, &self.path).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        error = %e,
                        "Atomic replace failed, using direct write"
                    );
                    let _ = fs::remove_file(&tmp).await;
                }
            },
            Err(e) => {
                warn!(
                    path = %tmp.display(),
                    error = %e,
                    "Temp file write failed, using direct write"
                );
            }
        }

        fs::write(&self.path, &data)
            .await
            .map_err(|e| StoreError::io(&self.path, e))
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }
}
