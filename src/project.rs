//! Projects: initialized roots and their prepared watch state
//!
//! A project is a directory that was initialized as tracked: it owns
//! a `.rewind` store root holding the catalog and the snapshot tree.
//! Preparation loads the ignore set and enumerates the watched
//! directory closure (every subdirectory of the root minus ignored
//! subtrees; the store root is excluded by the implicit patterns).

use crate::catalog::Catalog;
use crate::error::{Result, RewindError};
use crate::ignore::IgnoreSet;
use crate::store::ContentStore;
use crate::utils;
use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Name of the per-project store directory
pub const STORE_DIR: &str = ".rewind";

/// Default `.rewind/ignore` contents written by `init`
pub const DEFAULT_IGNORE: &str = "\
# Auto-generated by rewind
.git
.git/*
node_modules
node_modules/*
.DS_Store
*.tmp
*.log
*~
*.swp
*.swo
.*.swp
.*.swo
#*#
.#*
.vscode/*
*.zip
*.tar
*.tar.gz
*.tgz
*.tar.bz2
*.tar.xz
*.gz
*.bz2
*.xz
*.7z
*.rar
";

/// A prepared, active project
///
/// Shared between the registry, the event pipeline, and the snapshot
/// engine as `Arc<Project>`. The ignore set is immutable after
/// preparation; the watched-directory list grows and shrinks as
/// directories are created and removed under the root.
#[derive(Debug)]
pub struct Project {
    root: PathBuf,
    ignore: IgnoreSet,
    watch_dirs: RwLock<Vec<PathBuf>>,
}

impl Project {
    /// Prepare a project from its root directory
    ///
    /// Fails with `NotInitialized` when no `.rewind` store exists.
    /// Walks the tree to enumerate watched directories, skipping
    /// ignored subtrees wholesale.
    pub fn prepare(root: &Path) -> Result<Project> {
        if !root.join(STORE_DIR).is_dir() {
            return Err(RewindError::NotInitialized(root.to_path_buf()));
        }

        let ignore = IgnoreSet::load(root)?;
        let watch_dirs = discover_watch_dirs(root, &ignore)?;
        info!(
            root = %root.display(),
            directories = watch_dirs.len(),
            patterns = ignore.len(),
            "project prepared"
        );

        Ok(Project {
            root: root.to_path_buf(),
            ignore,
            watch_dirs: RwLock::new(watch_dirs),
        })
    }

    /// Project root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the ignore set excludes `path`
    pub fn is_ignored(&self, path: &Path) -> bool {
        self.ignore.matches(&self.root, path)
    }

    /// Number of loaded ignore patterns
    pub fn ignore_count(&self) -> usize {
        self.ignore.len()
    }

    /// `path` relative to the root, forward slashes
    pub fn rel(&self, path: &Path) -> Result<String> {
        utils::rel_slash(path, &self.root)
    }

    /// Open the project's catalog (on demand; dropped when done)
    pub fn catalog(&self) -> Result<Catalog> {
        Catalog::open(&self.root)
    }

    /// Snapshot store handle
    pub fn store(&self) -> ContentStore {
        ContentStore::new(&self.root)
    }

    /// Current watched-directory list
    pub fn watch_dirs(&self) -> Vec<PathBuf> {
        self.watch_dirs.read().clone()
    }

    /// Number of watched directories
    pub fn watch_dir_count(&self) -> usize {
        self.watch_dirs.read().len()
    }

    /// Record a newly created directory in the watch set
    ///
    /// The directory must exist, live under the root, and not match
    /// the ignore set. Returns `false` when it was already present.
    pub fn add_watch_dir(&self, dir: &Path) -> Result<bool> {
        if !dir.is_dir() {
            return Err(RewindError::invalid_path(dir, "not a directory"));
        }
        if dir.strip_prefix(&self.root).is_err() {
            return Err(RewindError::invalid_path(
                dir,
                format!("outside project root {:?}", self.root),
            ));
        }
        if self.is_ignored(dir) {
            return Err(RewindError::bad_state(format!(
                "directory matches ignore patterns: {}",
                dir.display()
            )));
        }

        let mut dirs = self.watch_dirs.write();
        if dirs.iter().any(|d| d == dir) {
            debug!(dir = %dir.display(), "directory already watched");
            return Ok(false);
        }
        dirs.push(dir.to_path_buf());
        Ok(true)
    }

    /// Drop a directory from the watch set
    pub fn remove_watch_dir(&self, dir: &Path) -> bool {
        let mut dirs = self.watch_dirs.write();
        let before = dirs.len();
        dirs.retain(|d| d != dir);
        dirs.len() != before
    }
}

/// Walk the root and collect the watched-directory closure
fn discover_watch_dirs(root: &Path, ignore: &IgnoreSet) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !ignore.matches(root, entry.path()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "error walking directory tree");
                continue;
            }
        };
        if entry.file_type().is_dir() {
            dirs.push(entry.path().to_path_buf());
        }
    }

    debug!(root = %root.display(), count = dirs.len(), "discovered watch directories");
    Ok(dirs)
}

/// Whether `dir` itself holds a `.rewind` store
pub fn has_store(dir: &Path) -> bool {
    dir.join(STORE_DIR).is_dir()
}

/// Find the nearest ancestor (or self) that holds a `.rewind` store
///
/// For file paths the search starts at the containing directory.
pub fn find_project_root(path: &Path) -> Option<PathBuf> {
    if !path.is_absolute() {
        return None;
    }

    let mut current = if path.is_file() {
        path.parent()?.to_path_buf()
    } else {
        path.to_path_buf()
    };

    loop {
        if has_store(&current) {
            return Some(current);
        }
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return None,
        }
    }
}

/// Initialize a `.rewind` store at `root`
///
/// Creates the store directory (0755), writes the default ignore
/// template, and creates an empty catalog. Fails when the target is
/// already initialized or lives inside another project.
pub fn init_store(root: &Path) -> Result<()> {
    if has_store(root) {
        return Err(RewindError::AlreadyInitialized(root.to_path_buf()));
    }
    if let Some(ancestor) = root.parent().and_then(find_project_root) {
        return Err(RewindError::AlreadyInitialized(ancestor));
    }

    let store_dir = root.join(STORE_DIR);
    fs::create_dir(&store_dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&store_dir, fs::Permissions::from_mode(0o755))?;
    }

    fs::write(store_dir.join("ignore"), DEFAULT_IGNORE)?;

    // Creating the catalog also creates the versions.db directory.
    let catalog = Catalog::create(root)?;
    catalog.flush()?;

    info!(root = %root.display(), "initialized rewind store");
    Ok(())
}

/// Delete a project's `.rewind` store root (history and all)
pub fn delete_store(root: &Path) -> Result<()> {
    let store_dir = root.join(STORE_DIR);
    if !store_dir.is_dir() {
        return Err(RewindError::NotInitialized(root.to_path_buf()));
    }
    fs::remove_dir_all(&store_dir)?;
    info!(root = %root.display(), "removed rewind store");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn init_temp_project() -> TempDir {
        let temp = TempDir::new().unwrap();
        init_store(temp.path()).unwrap();
        temp
    }

    #[test]
    fn test_init_store_layout() {
        let temp = init_temp_project();
        assert!(temp.path().join(".rewind").is_dir());
        assert!(temp.path().join(".rewind/ignore").is_file());
        assert!(temp.path().join(".rewind/versions.db").exists());
    }

    #[test]
    fn test_init_twice_fails() {
        let temp = init_temp_project();
        assert!(matches!(
            init_store(temp.path()),
            Err(RewindError::AlreadyInitialized(_))
        ));
    }

    #[test]
    fn test_init_inside_project_fails() {
        let temp = init_temp_project();
        let nested = temp.path().join("sub");
        fs::create_dir(&nested).unwrap();
        assert!(matches!(
            init_store(&nested),
            Err(RewindError::AlreadyInitialized(_))
        ));
    }

    #[test]
    fn test_prepare_requires_store() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            Project::prepare(temp.path()),
            Err(RewindError::NotInitialized(_))
        ));
    }

    #[test]
    fn test_prepare_discovers_dirs_and_skips_ignored() {
        let temp = init_temp_project();
        fs::create_dir_all(temp.path().join("src/inner")).unwrap();
        fs::create_dir_all(temp.path().join("node_modules/pkg")).unwrap();

        let project = Project::prepare(temp.path()).unwrap();
        let dirs = project.watch_dirs();

        assert!(dirs.contains(&temp.path().to_path_buf()));
        assert!(dirs.contains(&temp.path().join("src")));
        assert!(dirs.contains(&temp.path().join("src/inner")));
        // Store root and default-ignored trees are never watched.
        assert!(!dirs.iter().any(|d| d.starts_with(temp.path().join(".rewind"))));
        assert!(!dirs.iter().any(|d| d.starts_with(temp.path().join("node_modules"))));
    }

    #[test]
    fn test_add_watch_dir() {
        let temp = init_temp_project();
        let project = Project::prepare(temp.path()).unwrap();

        let fresh = temp.path().join("fresh");
        fs::create_dir(&fresh).unwrap();
        assert!(project.add_watch_dir(&fresh).unwrap());
        assert!(!project.add_watch_dir(&fresh).unwrap());

        let ignored = temp.path().join("node_modules");
        fs::create_dir(&ignored).unwrap();
        assert!(project.add_watch_dir(&ignored).is_err());

        let outside = TempDir::new().unwrap();
        assert!(project.add_watch_dir(outside.path()).is_err());
    }

    #[test]
    fn test_find_project_root() {
        let temp = init_temp_project();
        fs::create_dir_all(temp.path().join("a/b")).unwrap();
        fs::write(temp.path().join("a/b/f.txt"), "x").unwrap();

        let found = find_project_root(&temp.path().join("a/b/f.txt")).unwrap();
        assert_eq!(found, temp.path());
        assert_eq!(
            find_project_root(&temp.path().join("a/b")).unwrap(),
            temp.path()
        );
        assert!(find_project_root(Path::new("relative/path")).is_none());
    }

    #[test]
    fn test_delete_store() {
        let temp = init_temp_project();
        delete_store(temp.path()).unwrap();
        assert!(!temp.path().join(".rewind").exists());
        assert!(matches!(
            delete_store(temp.path()),
            Err(RewindError::NotInitialized(_))
        ));
    }
}
