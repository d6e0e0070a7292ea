//! Single durable JSON file with atomic replace.
//!
//! Writes go to a sibling temp file which is fsynced and renamed over the
//! target, so a crash mid-write leaves either the old or the new document,
//! never a mix.

use crate::error::{Result, TrackerError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Outcome of reading a slot.
#[derive(Debug)]
pub enum SlotRead<T> {
    /// File does not exist.
    Missing,
    /// File exists but does not parse.
    Corrupt(String),
    /// Parsed document.
    Loaded(T),
}

/// A durable JSON document at a fixed path.
#[derive(Debug, Clone)]
pub struct JsonSlot {
    path: PathBuf,
}

impl JsonSlot {
    /// Bind a slot to `path`. Nothing is touched on disk.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File path of this slot.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw bytes currently stored, or `None` if the file is absent.
    pub fn read_bytes(&self) -> Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TrackerError::Storage(format!(
                "cannot read {}: {e}",
                self.path.display()
            ))),
        }
    }

    /// Read and parse the stored document.
    pub fn read<T: DeserializeOwned>(&self) -> Result<SlotRead<T>> {
        let Some(bytes) = self.read_bytes()? else {
            return Ok(SlotRead::Missing);
        };
        match serde_json::from_slice(&bytes) {
            Ok(doc) => Ok(SlotRead::Loaded(doc)),
            Err(e) => Ok(SlotRead::Corrupt(e.to_string())),
        }
    }

    /// Serialize `doc` and atomically replace the slot. Returns the bytes written.
    pub fn write<T: Serialize>(&self, doc: &T) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec_pretty(doc).map_err(|e| {
            TrackerError::Storage(format!("cannot serialize {}: {e}", self.path.display()))
        })?;
        self.write_bytes(&bytes)?;
        Ok(bytes)
    }

    /// Atomically replace the slot contents with `bytes`.
    pub fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TrackerError::Storage(format!(
                    "cannot create state directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let tmp_path = self.path.with_extension("tmp");
        let mut file = std::fs::File::create(&tmp_path).map_err(|e| {
            TrackerError::Storage(format!("cannot create {}: {e}", tmp_path.display()))
        })?;
        file.write_all(bytes)
            .and_then(|()| file.sync_all())
            .map_err(|e| {
                TrackerError::Storage(format!("cannot write {}: {e}", tmp_path.display()))
            })?;
        drop(file);

        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            TrackerError::Storage(format!("cannot finalize {}: {e}", self.path.display()))
        })?;
        Ok(())
    }

    /// Move an unreadable file aside so the next write does not destroy it.
    ///
    /// Returns the quarantine path.
    pub fn quarantine(&self) -> Result<PathBuf> {
        let aside = self.path.with_extension("corrupt");
        std::fs::rename(&self.path, &aside).map_err(|e| {
            TrackerError::Storage(format!(
                "cannot move corrupt {} aside: {e}",
                self.path.display()
            ))
        })?;
        Ok(aside)
    }
}
