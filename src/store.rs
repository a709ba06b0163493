//! Content store: durable, immutable snapshot files
//!
//! Snapshots live under `<root>/.rewind/versions/` mirroring the
//! project tree, one file per captured version named
//! `v<N>_<YYYYMMDD_HHMMSS>`. The store never rewrites an existing
//! snapshot; after a successful [`ContentStore::store`] a reader of
//! the snapshot observes the full content of the file at capture
//! time.

use crate::error::Result;
use crate::types::STORAGE_STAMP_FORMAT;
use crate::utils;
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Snapshot storage for one project
#[derive(Debug, Clone)]
pub struct ContentStore {
    /// Project root the store belongs to
    root: PathBuf,
    /// `<root>/.rewind/versions`
    versions_dir: PathBuf,
}

impl ContentStore {
    /// Create a store handle for a project root
    pub fn new(project_root: &Path) -> Self {
        ContentStore {
            root: project_root.to_path_buf(),
            versions_dir: project_root.join(".rewind").join("versions"),
        }
    }

    /// Hash a file's content (streaming SHA-256, hex)
    pub fn hash(&self, path: &Path) -> Result<String> {
        utils::hash_file(path)
    }

    /// Copy `file_abs` into the store as version `version_number`
    ///
    /// Returns the storage path relative to the versions directory,
    /// always with forward slashes. Intermediate directories are
    /// created with mode 0755. The destination is fsynced before
    /// returning; on any failure after directory creation the partial
    /// destination is unlinked.
    pub fn store(&self, file_abs: &Path, version_number: u32) -> Result<String> {
        let rel = utils::rel_slash(file_abs, &self.root)?;
        let stamp = Local::now().format(STORAGE_STAMP_FORMAT);
        let storage_path = format!("{}/v{}_{}", rel, version_number, stamp);

        let dest = self.snapshot_path(&storage_path);
        if let Some(parent) = dest.parent() {
            create_dirs_0755(parent)?;
        }

        if let Err(e) = utils::copy_file_durable(file_abs, &dest) {
            // Don't leave a partial snapshot behind.
            if let Err(unlink_err) = fs::remove_file(&dest) {
                if unlink_err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %dest.display(), error = %unlink_err,
                          "failed to unlink partial snapshot");
                }
            }
            return Err(e);
        }

        debug!(source = %file_abs.display(), %storage_path, "stored snapshot");
        Ok(storage_path)
    }

    /// Delete a snapshot file; missing files are logged, not fatal
    pub fn remove(&self, storage_path: &str) -> Result<()> {
        let path = self.snapshot_path(storage_path);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "removed snapshot");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "snapshot already missing");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Absolute filesystem location of a snapshot
    ///
    /// `storage_path` is logical (forward slashes); the physical path
    /// is joined with native separators.
    pub fn snapshot_path(&self, storage_path: &str) -> PathBuf {
        let mut path = self.versions_dir.clone();
        for part in storage_path.split('/') {
            path.push(part);
        }
        path
    }

    /// The `<root>/.rewind/versions` directory
    pub fn versions_dir(&self) -> &Path {
        &self.versions_dir
    }
}

/// Recursively create directories with mode 0755
#[cfg(unix)]
fn create_dirs_0755(path: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o755).create(path)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_dirs_0755(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn project_with_file(content: &[u8]) -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join(".rewind")).unwrap();
        let file = temp.path().join("notes.txt");
        fs::write(&file, content).unwrap();
        (temp, file)
    }

    #[test]
    fn test_store_preserves_content() {
        let (temp, file) = project_with_file(b"snapshot me");
        let store = ContentStore::new(temp.path());

        let storage_path = store.store(&file, 1).unwrap();
        assert!(storage_path.starts_with("notes.txt/v1_"));

        let snapshot = store.snapshot_path(&storage_path);
        assert_eq!(fs::read(&snapshot).unwrap(), b"snapshot me");
    }

    #[test]
    fn test_store_nested_file() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join(".rewind")).unwrap();
        fs::create_dir_all(temp.path().join("src/deep")).unwrap();
        let file = temp.path().join("src/deep/mod.rs");
        fs::write(&file, b"pub mod x;").unwrap();

        let store = ContentStore::new(temp.path());
        let storage_path = store.store(&file, 3).unwrap();
        assert!(storage_path.starts_with("src/deep/mod.rs/v3_"));
        assert!(store.snapshot_path(&storage_path).exists());
    }

    #[test]
    fn test_snapshot_hash_matches_source() {
        let (temp, file) = project_with_file(b"hash fidelity");
        let store = ContentStore::new(temp.path());

        let storage_path = store.store(&file, 1).unwrap();
        let original = store.hash(&file).unwrap();
        let stored = store.hash(&store.snapshot_path(&storage_path)).unwrap();
        assert_eq!(original, stored);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (temp, file) = project_with_file(b"x");
        let store = ContentStore::new(temp.path());

        let storage_path = store.store(&file, 1).unwrap();
        store.remove(&storage_path).unwrap();
        assert!(!store.snapshot_path(&storage_path).exists());
        // Second removal of a missing snapshot is not an error.
        store.remove(&storage_path).unwrap();
    }
}
