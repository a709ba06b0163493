//! Per-project version catalog
//!
//! The catalog is the metadata side of a project's `.rewind` store: a
//! sled database at `<root>/.rewind/versions.db` holding one record
//! per captured [`FileVersion`] plus the tags attached to them. Rows
//! are bincode-encoded; timestamps are stored as UTC
//! `YYYY-MM-DD HH:MM:SS` strings and converted to local time only at
//! display.
//!
//! Three trees make up the logical schema:
//!
//! - `versions`: `<file_path>\0<version BE u32>` → `FileVersion`.
//!   Keys order by path then version, so "latest" is the last entry
//!   of a path's range and "all versions of a path" is a prefix scan.
//! - `ids`: `<id BE u64>` → version key, for id-addressed deletes.
//! - `tags`: `<version_id BE u64>\0<tag_name>` → `Tag`, so per-version
//!   tags are a prefix scan and `(version_id, tag_name)` uniqueness is
//!   key uniqueness.
//!
//! All mutating operations serialize on an internal mutex; the logical
//! model assumes one writer at a time per project.

use crate::error::{Result, RewindError};
use crate::types::{FileVersion, Tag};
use chrono::Utc;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::{debug, error, trace, warn};

/// Separator between the path and the version number in version keys
const KEY_SEP: u8 = 0;

/// Metadata catalog for one project
pub struct Catalog {
    db: sled::Db,
    versions: sled::Tree,
    ids: sled::Tree,
    tags: sled::Tree,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("versions", &self.versions.len())
            .field("tags", &self.tags.len())
            .finish()
    }
}

impl Catalog {
    /// Create (or reopen) the catalog for a project being initialized
    pub fn create(project_root: &Path) -> Result<Self> {
        let db_path = Self::db_path(project_root);
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open_db(&db_path)
    }

    /// Open the catalog of an existing project
    ///
    /// Fails with `NotInitialized` when the project has no `.rewind`
    /// store yet.
    pub fn open(project_root: &Path) -> Result<Self> {
        let db_path = Self::db_path(project_root);
        if !db_path.exists() {
            return Err(RewindError::NotInitialized(project_root.to_path_buf()));
        }
        Self::open_db(&db_path)
    }

    /// `<root>/.rewind/versions.db`
    pub fn db_path(project_root: &Path) -> PathBuf {
        project_root.join(".rewind").join("versions.db")
    }

    fn open_db(db_path: &Path) -> Result<Self> {
        // Connections are opened on demand and dropped when an
        // operation completes, so a daemon worker and a CLI command
        // can briefly race for the sled directory lock. Retry a few
        // times before reporting the conflict.
        let mut last_err = None;
        for _ in 0..20 {
            match sled::open(db_path) {
                Ok(db) => {
                    let versions = db.open_tree("versions")?;
                    let ids = db.open_tree("ids")?;
                    let tags = db.open_tree("tags")?;
                    return Ok(Catalog {
                        db,
                        versions,
                        ids,
                        tags,
                        write_lock: Mutex::new(()),
                    });
                }
                Err(e) => {
                    last_err = Some(e);
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }
            }
        }
        Err(RewindError::catalog(format!(
            "failed to open catalog at {:?}: {}",
            db_path,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Insert a new version row, assigning its id
    ///
    /// Fails with `Duplicate` if `(file_path, version_number)` already
    /// exists. The caller provides the version number it obtained from
    /// [`Catalog::next_version`]; uniqueness is re-checked here under
    /// the write lock so concurrent writers cannot both insert.
    pub fn add_version(&self, mut fv: FileVersion) -> Result<FileVersion> {
        let _guard = self.write_lock.lock();

        let key = version_key(&fv.file_path, fv.version_number);
        if self.versions.contains_key(&key)? {
            return Err(RewindError::duplicate(format!(
                "version {} of {} already recorded",
                fv.version_number, fv.file_path
            )));
        }

        fv.id = self.db.generate_id()?;
        self.versions.insert(&key, encode(&fv)?)?;
        self.ids.insert(fv.id.to_be_bytes(), key)?;
        self.db.flush()?;

        trace!(path = %fv.file_path, version = fv.version_number, id = fv.id, "version row inserted");
        Ok(fv)
    }

    /// Newest row for a path, or `None` when the path has no history
    pub fn latest(&self, file_path: &str) -> Result<Option<FileVersion>> {
        match self.versions.scan_prefix(path_prefix(file_path)).last() {
            Some(entry) => {
                let (_, value) = entry?;
                Ok(Some(decode(&value)?))
            }
            None => Ok(None),
        }
    }

    /// Next version number for a path (`max + 1`, starting at 1)
    pub fn next_version(&self, file_path: &str) -> Result<u32> {
        Ok(self
            .latest(file_path)?
            .map(|fv| fv.version_number + 1)
            .unwrap_or(1))
    }

    /// A specific `(file_path, version_number)` row
    pub fn version(&self, file_path: &str, number: u32) -> Result<Option<FileVersion>> {
        match self.versions.get(version_key(file_path, number))? {
            Some(value) => Ok(Some(decode(&value)?)),
            None => Ok(None),
        }
    }

    /// All rows for a path, newest first
    pub fn versions(&self, file_path: &str) -> Result<Vec<FileVersion>> {
        let mut rows = Vec::new();
        for entry in self.versions.scan_prefix(path_prefix(file_path)) {
            let (_, value) = entry?;
            rows.push(decode(&value)?);
        }
        rows.reverse();
        Ok(rows)
    }

    /// The latest row of every tracked path, ordered by path
    pub fn latest_of_all(&self) -> Result<Vec<FileVersion>> {
        let mut out: Vec<FileVersion> = Vec::new();
        let mut current: Option<FileVersion> = None;

        for entry in self.versions.iter() {
            let (_, value) = entry?;
            let row: FileVersion = decode(&value)?;
            match current.take() {
                Some(prev) if prev.file_path != row.file_path => {
                    out.push(prev);
                    current = Some(row);
                }
                _ => current = Some(row),
            }
        }
        if let Some(last) = current {
            out.push(last);
        }

        Ok(out)
    }

    /// Every non-deleted row in the catalog
    ///
    /// Used by the retention planner; no particular order is
    /// guaranteed beyond path grouping.
    pub fn live_versions(&self) -> Result<Vec<FileVersion>> {
        let mut rows = Vec::new();
        for entry in self.versions.iter() {
            let (_, value) = entry?;
            let row: FileVersion = decode(&value)?;
            if !row.deleted {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Sum of `file_size` over all non-deleted rows
    pub fn total_live_size(&self) -> Result<u64> {
        Ok(self.live_versions()?.iter().map(|fv| fv.file_size).sum())
    }

    /// Mark the latest row of a path as deleted and bump its timestamp
    pub fn mark_deleted(&self, file_path: &str) -> Result<FileVersion> {
        let _guard = self.write_lock.lock();

        let mut latest = self
            .latest(file_path)?
            .ok_or_else(|| RewindError::not_found(format!("no versions for {}", file_path)))?;

        latest.deleted = true;
        latest.timestamp = Utc::now();

        let key = version_key(&latest.file_path, latest.version_number);
        self.versions.insert(&key, encode(&latest)?)?;
        self.db.flush()?;

        debug!(path = %file_path, version = latest.version_number, "tombstone set");
        Ok(latest)
    }

    /// Clear the tombstone on a path whose latest row is deleted
    ///
    /// Fails with `BadState` when the latest row is not deleted.
    /// Returns the restored row.
    pub fn restore(&self, file_path: &str) -> Result<FileVersion> {
        let _guard = self.write_lock.lock();

        let mut latest = self
            .latest(file_path)?
            .ok_or_else(|| RewindError::not_found(format!("no versions for {}", file_path)))?;

        if !latest.deleted {
            return Err(RewindError::bad_state(format!(
                "file is not deleted: {}",
                file_path
            )));
        }

        latest.deleted = false;
        latest.timestamp = Utc::now();

        let key = version_key(&latest.file_path, latest.version_number);
        self.versions.insert(&key, encode(&latest)?)?;
        self.db.flush()?;

        debug!(path = %file_path, version = latest.version_number, "tombstone cleared");
        Ok(latest)
    }

    /// One row per path whose latest version is deleted, newest first
    pub fn all_deleted(&self) -> Result<Vec<FileVersion>> {
        let mut rows: Vec<FileVersion> = self
            .latest_of_all()?
            .into_iter()
            .filter(|fv| fv.deleted)
            .collect();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(rows)
    }

    /// Attach a tag to a specific undeleted version
    ///
    /// Rejects with `NotFound` when the version does not exist, with
    /// `BadState` when it is deleted, and with `Duplicate` when the
    /// tag is already present on it.
    pub fn add_tag(&self, file_path: &str, number: u32, tag_name: &str) -> Result<Tag> {
        let _guard = self.write_lock.lock();

        let version = self.version(file_path, number)?.ok_or_else(|| {
            RewindError::not_found(format!("version {} of {}", number, file_path))
        })?;
        if version.deleted {
            return Err(RewindError::bad_state(format!(
                "cannot tag deleted version {} of {}",
                number, file_path
            )));
        }

        let key = tag_key(version.id, tag_name);
        if self.tags.contains_key(&key)? {
            return Err(RewindError::duplicate(format!(
                "tag '{}' already on version {} of {}",
                tag_name, number, file_path
            )));
        }

        let tag = Tag {
            id: self.db.generate_id()?,
            version_id: version.id,
            tag_name: tag_name.to_string(),
            created_at: Utc::now(),
        };
        self.tags.insert(&key, encode(&tag)?)?;
        self.db.flush()?;

        debug!(path = %file_path, version = number, tag = tag_name, "tag added");
        Ok(tag)
    }

    /// Tags on a specific version, ordered by creation time
    pub fn tags_for(&self, file_path: &str, number: u32) -> Result<Vec<Tag>> {
        let version = match self.version(file_path, number)? {
            Some(v) => v,
            None => return Ok(Vec::new()),
        };
        let mut tags = self.tags_for_id(version.id)?;
        tags.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tags)
    }

    fn tags_for_id(&self, version_id: u64) -> Result<Vec<Tag>> {
        let mut tags = Vec::new();
        for entry in self.tags.scan_prefix(tag_prefix(version_id)) {
            let (_, value) = entry?;
            tags.push(decode(&value)?);
        }
        Ok(tags)
    }

    /// Whether any tag is attached to a version id
    pub fn has_tags(&self, version_id: u64) -> Result<bool> {
        Ok(self
            .tags
            .scan_prefix(tag_prefix(version_id))
            .next()
            .is_some())
    }

    /// Resolve the unique undeleted version of a path carrying a tag
    ///
    /// Fails with `NotFound` when no version matches and with
    /// `BadState` when the tag is ambiguous for the path.
    pub fn version_by_tag(&self, file_path: &str, tag_name: &str) -> Result<FileVersion> {
        let mut matches = Vec::new();
        for row in self.versions(file_path)? {
            if row.deleted {
                continue;
            }
            if self.tags.contains_key(tag_key(row.id, tag_name))? {
                matches.push(row);
            }
        }

        match matches.len() {
            0 => Err(RewindError::not_found(format!(
                "tag '{}' on {}",
                tag_name, file_path
            ))),
            1 => Ok(matches.remove(0)),
            n => Err(RewindError::bad_state(format!(
                "tag '{}' is ambiguous for {} ({} versions carry it)",
                tag_name, file_path, n
            ))),
        }
    }

    /// Look up a row by its catalog id
    pub fn version_by_id(&self, id: u64) -> Result<Option<FileVersion>> {
        match self.ids.get(id.to_be_bytes())? {
            Some(key) => match self.versions.get(&key)? {
                Some(value) => Ok(Some(decode(&value)?)),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    /// Delete the referenced rows (and their tags) in one batch
    ///
    /// Unknown ids are logged and skipped. Returns the number of rows
    /// actually removed.
    pub fn remove_versions(&self, ids: &[u64]) -> Result<usize> {
        let _guard = self.write_lock.lock();

        let mut removed = 0;
        for &id in ids {
            let key = match self.ids.get(id.to_be_bytes())? {
                Some(key) => key,
                None => {
                    warn!(id, "purge skipped unknown version id");
                    continue;
                }
            };

            self.versions.remove(&key)?;
            self.ids.remove(id.to_be_bytes())?;

            // A tagged version never enters a purge plan; clearing the
            // prefix here keeps the tags tree free of dangling rows if
            // an older catalog ever violated that.
            let tag_keys: Vec<sled::IVec> = self
                .tags
                .scan_prefix(tag_prefix(id))
                .keys()
                .collect::<std::result::Result<_, _>>()?;
            for tag_key in tag_keys {
                self.tags.remove(tag_key)?;
            }

            removed += 1;
        }
        self.db.flush()?;

        debug!(requested = ids.len(), removed, "purged version rows");
        Ok(removed)
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl Drop for Catalog {
    fn drop(&mut self) {
        if let Err(e) = self.db.flush() {
            error!("failed to flush catalog on drop: {}", e);
        }
    }
}

fn version_key(file_path: &str, number: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(file_path.len() + 5);
    key.extend_from_slice(file_path.as_bytes());
    key.push(KEY_SEP);
    key.extend_from_slice(&number.to_be_bytes());
    key
}

fn path_prefix(file_path: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(file_path.len() + 1);
    prefix.extend_from_slice(file_path.as_bytes());
    prefix.push(KEY_SEP);
    prefix
}

fn tag_key(version_id: u64, tag_name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(9 + tag_name.len());
    key.extend_from_slice(&version_id.to_be_bytes());
    key.push(KEY_SEP);
    key.extend_from_slice(tag_name.as_bytes());
    key
}

fn tag_prefix(version_id: u64) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(9);
    prefix.extend_from_slice(&version_id.to_be_bytes());
    prefix.push(KEY_SEP);
    prefix
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(value, bincode::config::standard())?)
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(value)
}
