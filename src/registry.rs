//! Project registry backed by the user-wide watch list
//!
//! The registry owns `<user-config>/rewind/watchlist.json`, a JSON
//! array of `{path, active}` records. On load, each record is
//! prepared into a [`Project`]; records that fail preparation (store
//! deleted, root gone, inactive) are dropped and the surviving list
//! is written back. Lookups take the read lock, mutations the write
//! lock.

use crate::error::{Result, RewindError};
use crate::project::{self, Project};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One persisted watch-list entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchRecord {
    /// Absolute project root
    pub path: PathBuf,
    /// Inactive records are dropped at preparation
    pub active: bool,
}

/// The set of registered projects
pub struct Registry {
    list_path: PathBuf,
    projects: RwLock<Vec<Arc<Project>>>,
}

impl Registry {
    /// Load and prepare the registry from the default location
    pub fn load() -> Result<Registry> {
        Self::load_from(default_list_path()?)
    }

    /// Load and prepare the registry from an explicit watch-list path
    pub fn load_from(list_path: PathBuf) -> Result<Registry> {
        let records = read_watchlist(&list_path)?;
        debug!(count = records.len(), "loaded watchlist records");

        let mut projects = Vec::new();
        for record in records {
            if !record.active {
                info!(path = %record.path.display(), "skipping inactive watch");
                continue;
            }
            match Project::prepare(&record.path) {
                Ok(project) => projects.push(Arc::new(project)),
                Err(e) => {
                    warn!(path = %record.path.display(), error = %e,
                          "dropping watch: preparation failed");
                }
            }
        }

        let registry = Registry {
            list_path,
            projects: RwLock::new(projects),
        };
        // Persisting here drops the records that failed preparation.
        registry.save()?;
        Ok(registry)
    }

    /// Register a new project root and prepare it
    ///
    /// Validates that the path exists, is a readable directory, and
    /// holds a `.rewind` store. Duplicate registrations are rejected.
    pub fn add(&self, path: &Path) -> Result<Arc<Project>> {
        if self
            .projects
            .read()
            .iter()
            .any(|p| p.root() == path)
        {
            return Err(RewindError::duplicate(format!(
                "watch already exists for path: {}",
                path.display()
            )));
        }

        validate_watch_path(path)?;

        let project = Arc::new(Project::prepare(path)?);
        self.projects.write().push(Arc::clone(&project));
        self.save()?;

        info!(path = %path.display(), "watch added");
        Ok(project)
    }

    /// Unregister a project root
    ///
    /// Returns the prepared project so the caller can unsubscribe its
    /// watched directories from the notifier.
    pub fn remove(&self, path: &Path) -> Result<Arc<Project>> {
        let removed = {
            let mut projects = self.projects.write();
            let idx = projects.iter().position(|p| p.root() == path);
            match idx {
                Some(idx) => projects.remove(idx),
                None => {
                    return Err(RewindError::not_found(format!(
                        "watch not found for path: {}",
                        path.display()
                    )))
                }
            }
        };
        self.save()?;

        info!(path = %path.display(), dirs = removed.watch_dir_count(), "watch removed");
        Ok(removed)
    }

    /// Find the project whose root is the nearest ancestor of `path`
    pub fn find_by_path(&self, path: &Path) -> Option<Arc<Project>> {
        let root = project::find_project_root(path)?;
        self.projects
            .read()
            .iter()
            .find(|p| p.root() == root)
            .map(Arc::clone)
    }

    /// Snapshot of the registered projects
    pub fn projects(&self) -> Vec<Arc<Project>> {
        self.projects.read().clone()
    }

    /// Number of registered projects
    pub fn len(&self) -> usize {
        self.projects.read().len()
    }

    /// Whether no projects are registered
    pub fn is_empty(&self) -> bool {
        self.projects.read().is_empty()
    }

    /// Persist the current project set back to the watch list
    ///
    /// Written with two-space indentation; an empty set is the empty
    /// array, never `null`.
    pub fn save(&self) -> Result<()> {
        let records: Vec<WatchRecord> = self
            .projects
            .read()
            .iter()
            .map(|p| WatchRecord {
                path: p.root().to_path_buf(),
                active: true,
            })
            .collect();

        if let Some(parent) = self.list_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&records)?;
        fs::write(&self.list_path, json)?;

        debug!(path = %self.list_path.display(), count = records.len(), "watchlist saved");
        Ok(())
    }
}

/// `<user-config>/rewind/watchlist.json`
pub fn default_list_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().ok_or_else(|| {
        RewindError::bad_state("could not determine the user configuration directory")
    })?;
    Ok(config_dir.join("rewind").join("watchlist.json"))
}

fn read_watchlist(list_path: &Path) -> Result<Vec<WatchRecord>> {
    if !list_path.exists() {
        debug!(path = %list_path.display(), "watchlist absent, starting empty");
        return Ok(Vec::new());
    }
    let data = fs::read_to_string(list_path)?;
    Ok(serde_json::from_str(&data)?)
}

fn validate_watch_path(path: &Path) -> Result<()> {
    let meta = fs::metadata(path)
        .map_err(|_| RewindError::invalid_path(path, "path does not exist"))?;
    if !meta.is_dir() {
        return Err(RewindError::invalid_path(path, "not a directory"));
    }
    fs::read_dir(path).map_err(|e| {
        RewindError::invalid_path(path, format!("cannot read directory: {}", e))
    })?;
    if !project::has_store(path) {
        return Err(RewindError::NotInitialized(path.to_path_buf()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_registry() -> (Registry, TempDir) {
        let config = TempDir::new().unwrap();
        let registry = Registry::load_from(config.path().join("watchlist.json")).unwrap();
        (registry, config)
    }

    fn init_project_dir() -> TempDir {
        let temp = TempDir::new().unwrap();
        project::init_store(temp.path()).unwrap();
        temp
    }

    #[test]
    fn test_absent_watchlist_is_empty() {
        let (registry, _config) = temp_registry();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_add_validations() {
        let (registry, _config) = temp_registry();

        // Nonexistent path
        assert!(registry.add(Path::new("/definitely/not/here")).is_err());

        // Directory without a store
        let bare = TempDir::new().unwrap();
        assert!(matches!(
            registry.add(bare.path()),
            Err(RewindError::NotInitialized(_))
        ));

        // Valid project, then duplicate
        let proj = init_project_dir();
        registry.add(proj.path()).unwrap();
        assert!(matches!(
            registry.add(proj.path()),
            Err(RewindError::Duplicate(_))
        ));
    }

    #[test]
    fn test_persist_round_trip() {
        let config = TempDir::new().unwrap();
        let list_path = config.path().join("watchlist.json");
        let proj = init_project_dir();

        {
            let registry = Registry::load_from(list_path.clone()).unwrap();
            registry.add(proj.path()).unwrap();
        }

        let written = fs::read_to_string(&list_path).unwrap();
        assert!(written.contains("\"active\": true"));

        let registry = Registry::load_from(list_path).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.projects()[0].root(), proj.path());
    }

    #[test]
    fn test_load_drops_failed_preparation() {
        let config = TempDir::new().unwrap();
        let list_path = config.path().join("watchlist.json");

        let records = vec![WatchRecord {
            path: PathBuf::from("/gone/away"),
            active: true,
        }];
        fs::create_dir_all(list_path.parent().unwrap()).unwrap();
        fs::write(&list_path, serde_json::to_string_pretty(&records).unwrap()).unwrap();

        let registry = Registry::load_from(list_path.clone()).unwrap();
        assert!(registry.is_empty());

        // The failed record was dropped from disk too.
        let survivors: Vec<WatchRecord> =
            serde_json::from_str(&fs::read_to_string(&list_path).unwrap()).unwrap();
        assert!(survivors.is_empty());
    }

    #[test]
    fn test_empty_list_is_array_not_null() {
        let config = TempDir::new().unwrap();
        let list_path = config.path().join("watchlist.json");
        let registry = Registry::load_from(list_path.clone()).unwrap();
        registry.save().unwrap();
        assert_eq!(fs::read_to_string(&list_path).unwrap().trim(), "[]");
    }

    #[test]
    fn test_remove_returns_project() {
        let (registry, _config) = temp_registry();
        let proj = init_project_dir();
        fs::create_dir(proj.path().join("sub")).unwrap();

        registry.add(proj.path()).unwrap();
        let removed = registry.remove(proj.path()).unwrap();
        assert!(removed.watch_dir_count() >= 2);
        assert!(registry.is_empty());

        assert!(matches!(
            registry.remove(proj.path()),
            Err(RewindError::NotFound(_))
        ));
    }

    #[test]
    fn test_find_by_path() {
        let (registry, _config) = temp_registry();
        let proj = init_project_dir();
        fs::create_dir_all(proj.path().join("src")).unwrap();
        fs::write(proj.path().join("src/lib.rs"), "x").unwrap();
        registry.add(proj.path()).unwrap();

        let found = registry.find_by_path(&proj.path().join("src/lib.rs")).unwrap();
        assert_eq!(found.root(), proj.path());

        let other = TempDir::new().unwrap();
        assert!(registry.find_by_path(other.path()).is_none());
    }
}
