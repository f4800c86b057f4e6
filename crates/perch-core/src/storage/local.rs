use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::storage::error::{StorageResult, StorageSystemError};
use crate::storage::provider::StorageProvider;

/// Local filesystem storage provider
#[derive(Clone)]
pub struct LocalStorageProvider {
    base_path: PathBuf,
}

impl LocalStorageProvider {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn resolve_path<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.base_path.join(path)
    }
}

impl StorageProvider for LocalStorageProvider {
    fn is_file(&self, path: &Path) -> bool {
        self.resolve_path(path).is_file()
    }

    fn create_dir_all(&self, path: &Path) -> StorageResult<()> {
        let full_path = self.resolve_path(path);
        fs::create_dir_all(&full_path).map_err(|e| StorageSystemError::io(e, "create_dir_all", full_path))
    }

    fn read_to_string(&self, path: &Path) -> StorageResult<String> {
        let full_path = self.resolve_path(path);
        fs::read_to_string(&full_path).map_err(|e| StorageSystemError::io(e, "read_to_string", full_path))
    }

    fn write_bytes(&self, path: &Path, contents: &[u8]) -> StorageResult<()> {
        let full_path = self.resolve_path(path);
        let parent = full_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| StorageSystemError::OperationFailed {
                operation: "write_bytes".to_string(),
                path: Some(full_path.clone()),
                message: "Cannot write to path without parent directory".to_string(),
            })?;
        if !parent.is_dir() {
            fs::create_dir_all(&parent).map_err(|e| StorageSystemError::io(e, "create_dir_all", parent.clone()))?;
        }

        // Write next to the target, then rename over it.
        let mut temp_file = NamedTempFile::new_in(&parent)
            .map_err(|e| StorageSystemError::io(e, "create_temp_file", parent.clone()))?;
        temp_file
            .write_all(contents)
            .and_then(|_| temp_file.as_file().sync_all())
            .map_err(|e| StorageSystemError::io(e, "write_to_temp_file", temp_file.path().to_path_buf()))?;
        temp_file
            .persist(&full_path)
            .map_err(|e| StorageSystemError::io(e.error, "persist_temp_file", full_path.clone()))?;
        Ok(())
    }

    fn copy(&self, from: &Path, to: &Path) -> StorageResult<()> {
        let full_from = self.resolve_path(from);
        let full_to = self.resolve_path(to);
        fs::copy(&full_from, &full_to)
            .map(|_| ())
            .map_err(|e| StorageSystemError::io(e, "copy", full_from))
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.resolve_path(path)
    }
}

impl fmt::Debug for LocalStorageProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStorageProvider")
            .field("base_path", &self.base_path)
            .finish()
    }
}
