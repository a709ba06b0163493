//! Core data types used throughout the rewind library
//!
//! This module contains the fundamental data structures shared across
//! components: catalog records, event classification, capture results,
//! and the status payload served over the control plane.

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp format used in the catalog and in human-facing listings
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Timestamp format embedded in snapshot storage paths
pub const STORAGE_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Serde adapter storing timestamps as UTC `YYYY-MM-DD HH:MM:SS` strings
///
/// The catalog persists this literal format; everything reading it back
/// re-interprets the string as UTC and converts to local time only for
/// display.
pub mod timestamp_format {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&ts.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(de)?;
        let naive = chrono::NaiveDateTime::parse_from_str(&s, TIMESTAMP_FORMAT)
            .map_err(serde::de::Error::custom)?;
        Ok(Utc.from_utc_datetime(&naive))
    }
}

/// A single captured version of a tracked file
///
/// Immutable after insert, except for the `deleted` tombstone flag and
/// the timestamp bump that accompanies flipping it. `file_path` is
/// always relative to the project root with forward slashes;
/// `storage_path` is relative to `<root>/.rewind/versions/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVersion {
    /// Catalog-assigned identifier, unique within a project
    pub id: u64,
    /// Path relative to the project root, forward slashes
    pub file_path: String,
    /// Per-path version number, starting at 1
    pub version_number: u32,
    /// Capture time (bumped when the tombstone flag flips)
    #[serde(with = "timestamp_format")]
    pub timestamp: DateTime<Utc>,
    /// Hex SHA-256 of the file content at capture
    pub file_hash: String,
    /// Content length in bytes at capture
    pub file_size: u64,
    /// Snapshot location relative to `.rewind/versions/`
    pub storage_path: String,
    /// Tombstone flag on the latest row: file is gone from the tree
    pub deleted: bool,
}

impl FileVersion {
    /// Capture time converted to the local timezone for display
    pub fn local_timestamp(&self) -> DateTime<Local> {
        self.timestamp.with_timezone(&Local)
    }
}

/// A named label attached to a specific file version
///
/// Tagged versions are protected from retention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Catalog-assigned identifier
    pub id: u64,
    /// The version this tag is attached to
    pub version_id: u64,
    /// Tag name, unique per version
    pub tag_name: String,
    /// When the tag was created
    #[serde(with = "timestamp_format")]
    pub created_at: DateTime<Utc>,
}

/// Classified filesystem event kinds admitted by the debouncer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// File or directory created
    Create,
    /// File content modified
    Write,
    /// File or directory removed
    Remove,
    /// File renamed (event carries the new path when it still exists)
    Rename,
    /// Metadata changed; content may have changed too
    Chmod,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::Create => "CREATE",
            EventKind::Write => "WRITE",
            EventKind::Remove => "REMOVE",
            EventKind::Rename => "RENAME",
            EventKind::Chmod => "CHMOD",
        };
        f.write_str(s)
    }
}

/// A debounced filesystem event routed to the snapshot engine
#[derive(Debug, Clone)]
pub struct FsEvent {
    /// What happened
    pub kind: EventKind,
    /// Absolute path the notifier reported
    pub path: std::path::PathBuf,
}

/// Result of running the capture primitive on a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// First version of a previously unseen path
    New,
    /// Content hash matches the latest version; nothing written
    Unchanged,
    /// Content changed; a new version was inserted
    Updated,
}

/// Totals reported by an initial scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Regular files visited
    pub total_files: usize,
    /// Files captured for the first time
    pub new_files: usize,
    /// Files captured as a new version
    pub changed_files: usize,
    /// Files whose latest version already matched
    pub unchanged_files: usize,
}

/// Per-project entry in the daemon status payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchDetail {
    /// Project root
    pub path: String,
    /// Currently subscribed directories
    pub watch_dirs: Vec<String>,
    /// Length of `watch_dirs`
    pub dir_count: usize,
    /// Number of loaded ignore patterns
    pub ignore_count: usize,
}

/// Snapshot of daemon state served for `status` requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub is_running: bool,
    pub total_watches: usize,
    pub total_watched_dirs: usize,
    pub event_channel_size: usize,
    pub event_channel_capacity: usize,
    /// Live worker-thread count (notifier, engine, control, transients)
    pub active_workers: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub uptime_duration: String,
    pub watch_details: Vec<WatchDetail>,
}
