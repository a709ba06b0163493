//! # Rewind - continuous file-level version history
//!
//! Rewind is a per-user daemon that watches initialized project
//! directories and captures a full content snapshot every time a
//! tracked file is created, modified, renamed, or deleted. History
//! lives inside each project under `.rewind/`: a catalog of version
//! metadata plus one immutable snapshot file per captured version.
//!
//! ## Overview
//!
//! - Initialize a project with `rewind init`; the daemon (`rewind
//!   watch`) picks it up and keeps history current from filesystem
//!   events.
//! - Inspect and roll back with `rewind rollback`, compare with
//!   `rewind diff`, bring deleted files back with `rewind restore`.
//! - Pin important versions with `rewind tag`; tagged versions are
//!   never purged.
//! - Reclaim space with `rewind purge` under keep-last, older-than,
//!   or max-size strategies.
//!
//! ## Architecture
//!
//! Native filesystem events are debounced per (path, kind), routed to
//! the owning project, filtered through its ignore patterns, and
//! queued to the snapshot engine over a bounded channel. The engine's
//! capture primitive is idempotent on content hash, which makes the
//! pipeline's drop-on-backpressure policy safe: an initial scan at
//! startup converges the catalog with the tree no matter what was
//! missed.
//!
//! Each project's catalog is an embedded sled database; snapshots are
//! plain files mirroring the project layout under
//! `.rewind/versions/`. A retention planner selects purge victims
//! without ever removing a tagged version or a file's last remaining
//! version.
//!
//! ## Module organization
//!
//! - [`catalog`]: version/tag metadata and its query contracts
//! - [`store`]: snapshot file storage
//! - [`ignore`]: ignore-pattern loading and matching
//! - [`project`] / [`registry`]: initialized roots and the watch list
//! - [`events`]: debouncing and notifier subscriptions
//! - [`engine`]: capture, scanning, rollback, restore
//! - [`retention`]: purge planning and execution
//! - [`control`] / [`daemon`]: the control plane and worker wiring
//! - [`diff`]: line diffs for the CLI
//! - [`error`] / [`types`]: shared error and data types

pub mod catalog;
pub mod control;
pub mod daemon;
pub mod diff;
pub mod engine;
pub mod error;
pub mod events;
pub mod ignore;
pub mod project;
pub mod registry;
pub mod retention;
pub mod store;
pub mod types;
pub mod utils;

pub use catalog::Catalog;
pub use daemon::Daemon;
pub use engine::{process_file, restore_deleted, rollback, SnapshotEngine};
pub use error::{Result, RewindError};
pub use ignore::IgnoreSet;
pub use project::Project;
pub use registry::Registry;
pub use retention::{PurgeStrategy, RetentionPlan};
pub use store::ContentStore;
pub use types::{CaptureOutcome, DaemonStatus, EventKind, FileVersion, Tag};
