use std::fmt::Debug;
use std::path::{Path, PathBuf};

use crate::storage::error::StorageResult;

/// Backing store for the settings file.
///
/// Paths are relative to the provider's base location.
pub trait StorageProvider: Send + Sync + Debug {
    fn is_file(&self, path: &Path) -> bool;

    fn create_dir_all(&self, path: &Path) -> StorageResult<()>;

    fn read_to_string(&self, path: &Path) -> StorageResult<String>;

    /// Writes a whole file. Implementations must replace the target
    /// atomically: on failure the previous contents stay intact.
    fn write_bytes(&self, path: &Path, contents: &[u8]) -> StorageResult<()>;

    fn copy(&self, from: &Path, to: &Path) -> StorageResult<()>;

    /// Absolute location of `path`.
    fn resolve(&self, path: &Path) -> PathBuf;
}
