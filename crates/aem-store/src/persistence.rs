//! Whole-file JSON snapshots with atomic replacement.
//!
//! Each save writes a temporary file next to the target and renames it over
//! the snapshot, so readers observe either the old or the new snapshot and
//! never a partial one.

use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::StoreError;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize)]
struct SnapshotRef<'a, T> {
    version: u32,
    data: &'a T,
}

#[derive(Deserialize)]
struct Snapshot<T> {
    version: u32,
    data: T,
}

/// A snapshot at a fixed path, fully overwritten on every save.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read the snapshot. `Ok(None)` when the file does not exist.
    pub fn try_load<T: DeserializeOwned>(&self) -> Result<Option<T>, StoreError> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let snapshot: Snapshot<T> = serde_json::from_reader(BufReader::new(file)).map_err(|source| {
            StoreError::Serialization {
                path: self.path.clone(),
                source,
            }
        })?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::UnsupportedVersion {
                path: self.path.clone(),
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        Ok(Some(snapshot.data))
    }

    /// Read the snapshot, treating a missing or unreadable file as empty state.
    pub fn load<T: DeserializeOwned + Default>(&self) -> T {
        match self.try_load() {
            Ok(Some(data)) => data,
            Ok(None) => {
                debug!(path = %self.path.display(), "no snapshot, starting empty");
                T::default()
            }
            Err(error) => {
                warn!(%error, "discarding unreadable snapshot");
                T::default()
            }
        }
    }

    /// Write the snapshot through a temporary file and atomically replace
    /// the previous one.
    pub fn save<T: Serialize>(&self, data: &T) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        fs::create_dir_all(dir).map_err(io_err)?;
        let temp = NamedTempFile::new_in(dir).map_err(io_err)?;

        let mut writer = BufWriter::new(temp);
        serde_json::to_writer(
            &mut writer,
            &SnapshotRef {
                version: SNAPSHOT_VERSION,
                data,
            },
        )
        .map_err(|source| StoreError::Serialization {
            path: self.path.clone(),
            source,
        })?;
        writer.flush().map_err(io_err)?;
        let temp = writer.into_inner().map_err(|e| io_err(e.into_error()))?;
        temp.as_file().sync_all().map_err(io_err)?;
        temp.persist(&self.path).map_err(|e| io_err(e.error))?;

        debug!(path = %self.path.display(), "saved snapshot");
        Ok(())
    }
}
