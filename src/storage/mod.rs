//! # Storage Module - Flat JSON Persistence
//!
//! The bridge persists exactly two small documents under the configured data
//! directory:
//!
//! ```text
//! data/
//! ├── node_names.json   ← suffix → display name (object)
//! └── favorites.json    ← watched suffixes (array)
//! ```
//!
//! Both are read fully at load time and rewritten fully on every mutation. Writes go
//! through a unique temp file in the same directory followed by a rename, so a crash
//! mid-write never leaves a truncated document behind.
//!
//! Callers treat every [`StoreError`] as non-fatal: they log it and keep operating on
//! their in-memory copy.

use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the node-name cache inside the data directory.
pub const NODE_NAMES_FILE: &str = "node_names.json";
/// File name of the favorites list inside the data directory.
pub const FAVORITES_FILE: &str = "favorites.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// True when the document simply does not exist yet (first run).
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// A single JSON document on disk.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Store located at `<data_dir>/<file_name>`.
    pub fn in_dir<P: AsRef<Path>>(data_dir: P, file_name: &str) -> Self {
        Self::new(data_dir.as_ref().join(file_name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and decode the whole document.
    pub fn load<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        let content = fs::read_to_string(&self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        // Guard against accidental leading NULs from previous partial writes
        let cleaned = content.trim_start_matches('\0');
        serde_json::from_str(cleaned).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })
    }

    /// Replace the whole document with the pretty-printed `value`.
    pub fn save<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(value).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        self.write_atomic(content.as_bytes())
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })
    }

    fn write_atomic(&self, bytes: &[u8]) -> std::io::Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let base = self
            .path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("store.json");
        let mut counter = 0u32;
        let tmp_path = loop {
            let candidate = dir.join(format!(".{}.tmp-{}-{}", base, std::process::id(), counter));
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
            {
                Ok(mut tmp) => {
                    tmp.write_all(bytes)?;
                    tmp.flush()?;
                    let _ = tmp.sync_all();
                    break candidate;
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    counter = counter.saturating_add(1);
                    continue;
                }
                Err(e) => return Err(e),
            }
        };

        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        if let Ok(dir_file) = File::open(&dir) {
            let _ = dir_file.sync_all();
        }
        Ok(())
    }
}
