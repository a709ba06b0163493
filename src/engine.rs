//! Snapshot engine: turns events and scans into catalog mutations
//!
//! The single capture primitive is [`process_file`]: stat, hash,
//! compare against the latest catalog row, and store a new version
//! only when the content actually changed. Event dispatch, the
//! initial scan, rollback, and restore are all built on it.
//!
//! Capture is idempotent on content: processing an unchanged file is
//! a no-op, which is what makes the pipeline's drop-on-backpressure
//! policy safe.

use crate::catalog::Catalog;
use crate::error::{Result, RewindError};
use crate::events::EventPipeline;
use crate::project::Project;
use crate::registry::Registry;
use crate::store::ContentStore;
use crate::types::{CaptureOutcome, EventKind, FileVersion, FsEvent, ScanStats};
use crate::utils;
use chrono::Utc;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Capture the current state of a file into the project's history
///
/// `rel` is the catalog path (relative to `root`, forward slashes).
/// Returns which branch was taken; `Unchanged` writes nothing.
pub fn process_file(root: &Path, abs: &Path, rel: &str) -> Result<CaptureOutcome> {
    let metadata = fs::metadata(abs)?;
    let hash = utils::hash_file(abs)?;

    let catalog = Catalog::open(root)?;
    let store = ContentStore::new(root);

    match catalog.latest(rel)? {
        None => {
            let fv = capture_version(&catalog, &store, abs, rel, &hash, metadata.len())?;
            info!(path = %rel, version = fv.version_number, "new file captured");
            Ok(CaptureOutcome::New)
        }
        Some(latest) if latest.file_hash == hash => {
            debug!(path = %rel, "file unchanged");
            Ok(CaptureOutcome::Unchanged)
        }
        Some(_) => {
            let fv = capture_version(&catalog, &store, abs, rel, &hash, metadata.len())?;
            info!(path = %rel, version = fv.version_number, "file changed, new version captured");
            Ok(CaptureOutcome::Updated)
        }
    }
}

/// Store a snapshot and insert its row; unlink the snapshot if the
/// insert fails
fn capture_version(
    catalog: &Catalog,
    store: &ContentStore,
    abs: &Path,
    rel: &str,
    hash: &str,
    size: u64,
) -> Result<FileVersion> {
    let version_number = catalog.next_version(rel)?;
    let storage_path = store.store(abs, version_number)?;

    let row = FileVersion {
        id: 0,
        file_path: rel.to_string(),
        version_number,
        timestamp: Utc::now(),
        file_hash: hash.to_string(),
        file_size: size,
        storage_path: storage_path.clone(),
        deleted: false,
    };

    match catalog.add_version(row) {
        Ok(fv) => Ok(fv),
        Err(e) => {
            if let Err(cleanup) = store.remove(&storage_path) {
                warn!(path = %rel, error = %cleanup, "failed to unlink snapshot after insert failure");
            }
            Err(e)
        }
    }
}

/// Walk a project and capture every non-ignored regular file
///
/// Ignored directories are pruned wholesale; per-file failures are
/// logged and scanning continues. `observe` is called once per
/// processed file.
pub fn scan_project_with<F>(project: &Project, mut observe: F) -> ScanStats
where
    F: FnMut(&Path, CaptureOutcome),
{
    let root = project.root();
    let mut stats = ScanStats::default();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !project.is_ignored(entry.path()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "error accessing entry during scan");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        stats.total_files += 1;
        let abs = entry.path();
        let rel = match project.rel(abs) {
            Ok(rel) => rel,
            Err(e) => {
                warn!(path = %abs.display(), error = %e, "failed to relativize path during scan");
                continue;
            }
        };

        match process_file(root, abs, &rel) {
            Ok(outcome) => {
                match outcome {
                    CaptureOutcome::New => stats.new_files += 1,
                    CaptureOutcome::Updated => stats.changed_files += 1,
                    CaptureOutcome::Unchanged => stats.unchanged_files += 1,
                }
                observe(abs, outcome);
            }
            Err(e) => {
                warn!(path = %abs.display(), error = %e, "failed to process file during scan");
            }
        }
    }

    stats
}

/// [`scan_project_with`] without an observer
pub fn scan_project(project: &Project) -> ScanStats {
    scan_project_with(project, |_, _| {})
}

/// Outcome of a rollback, for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollbackOutcome {
    /// Version number the file was rolled back to
    pub restored_version: u32,
    /// Version the pre-rollback content was saved as, when it
    /// differed from the latest captured state
    pub saved_current_as: Option<u32>,
}

/// Roll a file back to a prior version
///
/// If the working file has edits that were never captured (its hash
/// differs from the latest row), they are captured first so the
/// rollback loses nothing.
pub fn rollback(root: &Path, file_abs: &Path, target_version: u32) -> Result<RollbackOutcome> {
    let rel = utils::rel_slash(file_abs, root)?;
    let catalog = Catalog::open(root)?;
    let store = ContentStore::new(root);

    let target = catalog
        .version(&rel, target_version)?
        .ok_or_else(|| RewindError::not_found(format!("version {} of {}", target_version, rel)))?;
    if target.deleted {
        return Err(RewindError::bad_state(format!(
            "cannot rollback to deleted version {} of {}",
            target_version, rel
        )));
    }

    let latest = catalog
        .latest(&rel)?
        .ok_or_else(|| RewindError::not_found(format!("no versions for {}", rel)))?;
    if latest.version_number == target_version {
        return Err(RewindError::bad_state(format!(
            "{} is already at version {}",
            rel, target_version
        )));
    }

    if !file_abs.is_file() {
        return Err(RewindError::invalid_path(
            file_abs,
            "current file does not exist",
        ));
    }

    let snapshot = store.snapshot_path(&target.storage_path);
    if !snapshot.is_file() {
        return Err(RewindError::not_found(format!(
            "snapshot for version {} of {}",
            target_version, rel
        )));
    }

    // Preserve live edits as a version of their own before the
    // working file is overwritten.
    let current_hash = utils::hash_file(file_abs)?;
    let saved_current_as = if current_hash != latest.file_hash {
        let size = fs::metadata(file_abs)?.len();
        let saved = capture_version(&catalog, &store, file_abs, &rel, &current_hash, size)?;
        info!(path = %rel, version = saved.version_number, "current state saved before rollback");
        Some(saved.version_number)
    } else {
        None
    };

    utils::copy_file_durable(&snapshot, file_abs)?;
    info!(path = %rel, version = target_version, "rollback completed");

    Ok(RollbackOutcome {
        restored_version: target_version,
        saved_current_as,
    })
}

/// Bring a deleted file back from its latest snapshot
///
/// Requires the latest catalog row to carry the tombstone. Clears it
/// and copies the snapshot content back to the original location,
/// creating parent directories as needed.
pub fn restore_deleted(root: &Path, file_abs: &Path) -> Result<FileVersion> {
    let rel = utils::rel_slash(file_abs, root)?;
    let catalog = Catalog::open(root)?;
    let store = ContentStore::new(root);

    // Check the snapshot before flipping the tombstone so a missing
    // file leaves the catalog untouched.
    let latest = catalog
        .latest(&rel)?
        .ok_or_else(|| RewindError::not_found(format!("no versions for {}", rel)))?;
    if !latest.deleted {
        return Err(RewindError::bad_state(format!(
            "file is not deleted: {}",
            rel
        )));
    }
    let snapshot = store.snapshot_path(&latest.storage_path);
    if !snapshot.is_file() {
        return Err(RewindError::not_found(format!(
            "snapshot for version {} of {}",
            latest.version_number, rel
        )));
    }

    let restored = catalog.restore(&rel)?;

    if let Some(parent) = file_abs.parent() {
        create_dirs_0755(parent)?;
    }
    utils::copy_file_durable(&snapshot, file_abs)?;

    info!(path = %rel, version = restored.version_number, "deleted file restored");
    Ok(restored)
}

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

/// Dispatches classified events against the registry and pipeline
pub struct SnapshotEngine {
    registry: Arc<Registry>,
    pipeline: Arc<EventPipeline>,
}

impl SnapshotEngine {
    pub fn new(registry: Arc<Registry>, pipeline: Arc<EventPipeline>) -> Self {
        SnapshotEngine { registry, pipeline }
    }

    /// Subscribe the notifier to all of a project's watched directories
    pub fn subscribe_project(&self, project: &Project) {
        self.pipeline.add_project_dirs(&project.watch_dirs());
    }

    /// Unsubscribe a project's watched directories, best-effort
    pub fn unsubscribe_project(&self, project: &Project) {
        self.pipeline.remove_project_dirs(&project.watch_dirs());
    }

    /// Scan every registered project at startup
    pub fn initial_scan(&self) -> ScanStats {
        info!("starting initial file system scan");
        let mut totals = ScanStats::default();

        for project in self.registry.projects() {
            let stats = scan_project(&project);
            totals.total_files += stats.total_files;
            totals.new_files += stats.new_files;
            totals.changed_files += stats.changed_files;
            totals.unchanged_files += stats.unchanged_files;
        }

        info!(
            total = totals.total_files,
            new = totals.new_files,
            changed = totals.changed_files,
            unchanged = totals.unchanged_files,
            "initial scan completed"
        );
        totals
    }

    /// Handle one admitted event; per-file failures never propagate
    pub fn handle_event(&self, event: &FsEvent) {
        let project = match self.registry.find_by_path(&event.path) {
            Some(project) => project,
            None => {
                debug!(path = %event.path.display(), "event outside any project, dropped");
                return;
            }
        };
        if project.is_ignored(&event.path) {
            debug!(path = %event.path.display(), "event matches ignore set, dropped");
            return;
        }

        match event.kind {
            EventKind::Create => self.handle_create(&project, &event.path),
            EventKind::Write => self.handle_write(&project, &event.path),
            EventKind::Remove => self.handle_remove(&project, &event.path),
            EventKind::Rename => self.handle_rename(&project, &event.path),
            EventKind::Chmod => self.handle_chmod(&project, &event.path),
        }
    }

    fn handle_create(&self, project: &Project, path: &Path) {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "could not stat created item");
                return;
            }
        };

        if metadata.is_dir() {
            self.watch_new_directory(project, path);
        } else {
            self.capture(project, path);
        }
    }

    /// The notifier is non-recursive: new directories have to be
    /// subscribed explicitly, after the ignore check
    fn watch_new_directory(&self, project: &Project, path: &Path) {
        match project.add_watch_dir(path) {
            Ok(true) => {
                if let Err(e) = self.pipeline.subscribe(path) {
                    warn!(dir = %path.display(), error = %e,
                          "failed to subscribe created directory");
                    project.remove_watch_dir(path);
                    return;
                }
                info!(dir = %path.display(), "created directory added to watch set");
            }
            Ok(false) => {}
            Err(e) => {
                debug!(dir = %path.display(), error = %e, "created directory not watched");
            }
        }
    }

    fn handle_write(&self, project: &Project, path: &Path) {
        if path.is_file() {
            self.capture(project, path);
        }
    }

    fn handle_remove(&self, project: &Project, path: &Path) {
        // A removed watched directory leaves the watch set; the
        // native watch died with the directory itself.
        if project.remove_watch_dir(path) {
            if let Err(e) = self.pipeline.unsubscribe(path) {
                debug!(dir = %path.display(), error = %e,
                       "stale subscription already gone");
            }
            info!(dir = %path.display(), "removed directory dropped from watch set");
            return;
        }

        let rel = match project.rel(path) {
            Ok(rel) => rel,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to relativize removed path");
                return;
            }
        };

        let result = (|| -> Result<Option<FileVersion>> {
            let catalog = project.catalog()?;
            if catalog.latest(&rel)?.is_none() {
                return Ok(None);
            }
            Ok(Some(catalog.mark_deleted(&rel)?))
        })();

        match result {
            Ok(None) => debug!(path = %rel, "untracked file removed, ignored"),
            Ok(Some(row)) => {
                info!(path = %rel, version = row.version_number, "file marked deleted")
            }
            Err(e) => warn!(path = %rel, error = %e, "failed to mark file deleted"),
        }
    }

    fn handle_rename(&self, project: &Project, path: &Path) {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(_) => {
                debug!(path = %path.display(), "renamed path no longer exists, dropped");
                return;
            }
        };

        if metadata.is_dir() {
            self.watch_new_directory(project, path);
        } else {
            self.capture(project, path);
        }
    }

    /// Some tools rewrite content while only surfacing a metadata
    /// event; re-capture tracked files to catch that
    fn handle_chmod(&self, project: &Project, path: &Path) {
        if !path.is_file() {
            return;
        }

        let tracked = project
            .rel(path)
            .ok()
            .and_then(|rel| {
                project
                    .catalog()
                    .and_then(|catalog| catalog.latest(&rel))
                    .ok()
                    .flatten()
            })
            .is_some();

        if tracked {
            self.capture(project, path);
        }
    }

    fn capture(&self, project: &Project, path: &Path) {
        let rel = match project.rel(path) {
            Ok(rel) => rel,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to relativize path");
                return;
            }
        };
        if let Err(e) = process_file(project.root(), path, &rel) {
            warn!(path = %rel, error = %e, "failed to process file");
        }
    }
}
