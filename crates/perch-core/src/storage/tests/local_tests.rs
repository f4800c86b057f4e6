#![cfg(test)]

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::tempdir;

use crate::storage::error::StorageSystemError;
use crate::storage::local::LocalStorageProvider;
use crate::storage::provider::StorageProvider;

fn entries(dir: &Path) -> Vec<PathBuf> {
    let mut names: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|e| PathBuf::from(e.unwrap().file_name()))
        .collect();
    names.sort();
    names
}

#[test]
fn test_write_creates_parents_and_reads_back() {
    let dir = tempdir().unwrap();
    let provider = LocalStorageProvider::new(dir.path().to_path_buf());
    let path = Path::new("nested/deeper/file.txt");

    provider.write_bytes(path, b"hello").unwrap();
    assert!(provider.is_file(path));
    assert!(!provider.is_file(Path::new("nested/deeper")));
    assert_eq!(provider.read_to_string(path).unwrap(), "hello");
    assert_eq!(provider.resolve(path), dir.path().join(path));
}

#[test]
fn test_write_replaces_whole_file() {
    let dir = tempdir().unwrap();
    let provider = LocalStorageProvider::new(dir.path().to_path_buf());
    let path = Path::new("widgets.json");

    provider.write_bytes(path, b"a much longer first version").unwrap();
    provider.write_bytes(path, b"short").unwrap();
    assert_eq!(provider.read_to_string(path).unwrap(), "short");

    // No temporary files are left next to the target.
    assert_eq!(entries(dir.path()), vec![PathBuf::from("widgets.json")]);
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempdir().unwrap();
    let provider = LocalStorageProvider::new(dir.path().to_path_buf());
    let err = provider.read_to_string(Path::new("missing.json")).unwrap_err();
    match err {
        StorageSystemError::Io { operation, path, source } => {
            assert_eq!(operation, "read_to_string");
            assert_eq!(path, dir.path().join("missing.json"));
            assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_copy_and_create_dir() {
    let dir = tempdir().unwrap();
    let provider = LocalStorageProvider::new(dir.path().to_path_buf());
    provider.write_bytes(Path::new("b.txt"), b"b").unwrap();
    provider.copy(Path::new("b.txt"), Path::new("a.txt")).unwrap();
    provider.create_dir_all(Path::new("sub/inner")).unwrap();

    assert_eq!(
        entries(dir.path()),
        vec![PathBuf::from("a.txt"), PathBuf::from("b.txt"), PathBuf::from("sub")]
    );
    assert_eq!(provider.read_to_string(Path::new("a.txt")).unwrap(), "b");
    assert!(dir.path().join("sub/inner").is_dir());
}

#[test]
fn test_copy_of_missing_file_fails() {
    let dir = tempdir().unwrap();
    let provider = LocalStorageProvider::new(dir.path().to_path_buf());
    let err = provider.copy(Path::new("nope"), Path::new("other")).unwrap_err();
    assert!(matches!(err, StorageSystemError::Io { operation, .. } if operation == "copy"));
}
