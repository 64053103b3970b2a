//! Filesystem store with atomic writes

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info, trace};

use super::{sanitize_key, Store};
use crate::errors::StorageError;

const EXTENSION: &str = "json";

/// Store backed by one JSON file per key
///
/// Writes go to a temporary file in the same directory which is then renamed
/// over the destination, so readers only ever see complete files. Files and
/// the directory get owner-only permissions on Unix.
#[derive(Debug, Clone)]
pub struct FileStore {
    /// Directory holding one file per entry
    base_path: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `base_path`, creating the directory if needed
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the directory cannot be created or its
    /// permissions cannot be set.
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref();
        fs::create_dir_all(base_path).map_err(|e| StorageError::io(base_path, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(base_path, fs::Permissions::from_mode(0o700))
                .map_err(|e| StorageError::io(base_path, e))?;
        }

        debug!(storage_path = %base_path.display(), "Opened file store");

        Ok(Self {
            base_path: base_path.to_path_buf(),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Path of the file backing `key`
    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.base_path
            .join(format!("{}.{}", sanitize_key(key), EXTENSION))
    }
}

impl Store for FileStore {
    fn fetch(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.entry_path(key);
        match fs::read_to_string(&path) {
            Ok(content) => {
                trace!(key = %key, path = %path.display(), "Loaded stored entry");
                Ok(Some(content))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(key = %key, "No stored entry found");
                Ok(None)
            }
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    fn store(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.entry_path(key);

        // Write to a temp file in the same directory for an atomic rename
        let mut temp =
            NamedTempFile::new_in(&self.base_path).map_err(|e| StorageError::io(&self.base_path, e))?;
        temp.write_all(value.as_bytes())
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|e| StorageError::io(temp.path(), e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(temp.path(), fs::Permissions::from_mode(0o600))
                .map_err(|e| StorageError::io(temp.path(), e))?;
        }

        // Atomic replace
        temp.persist(&path)
            .map_err(|e| StorageError::io(&path, e.error))?;

        info!(key = %key, path = %path.display(), "Saved entry to storage");
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let entries = match fs::read_dir(&self.base_path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.base_path, e)),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StorageError::io(&self.base_path, e))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.entry_path(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(key = %key, "Deleted stored entry");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }
}
