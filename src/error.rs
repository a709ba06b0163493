//! Error types for the rewind library
//!
//! This module defines all error types that can occur during rewind
//! operations. Errors are grouped by semantic kind rather than by the
//! subsystem that produced them, so the control plane and the CLI can
//! map them to user-facing messages without inspecting internals.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the rewind library
pub type Result<T> = std::result::Result<T, RewindError>;

/// Main error type for all rewind operations
#[derive(Debug, Error)]
pub enum RewindError {
    /// No `.rewind` store exists under the target root
    #[error("not a rewind project (no .rewind directory): {0:?}")]
    NotInitialized(PathBuf),

    /// A `.rewind` store already exists at or above the target
    #[error("rewind already initialized at {0:?}")]
    AlreadyInitialized(PathBuf),

    /// Operation addresses a path with no ancestor project root
    #[error("no rewind project found above {0:?}")]
    NotAProjectTree(PathBuf),

    /// Path is missing, not a directory, unreadable, or escapes the root
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath {
        /// The offending path
        path: PathBuf,
        /// Why the path was rejected
        reason: String,
    },

    /// Project already registered, or tag already present
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// Version, tag, deleted entry, or project not present
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation is not valid in the current state
    #[error("{0}")]
    BadState(String),

    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Persistence-layer failure in the catalog
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Connect, timeout, or framing failure at the IPC transport
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors from the filesystem notifier
    #[error("notifier error: {0}")]
    Notify(#[from] notify::Error),

    /// Walk directory error from the walkdir crate
    #[error("walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),
}

impl From<sled::Error> for RewindError {
    fn from(err: sled::Error) -> Self {
        RewindError::Catalog(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for RewindError {
    fn from(err: bincode::error::DecodeError) -> Self {
        RewindError::Catalog(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for RewindError {
    fn from(err: bincode::error::EncodeError) -> Self {
        RewindError::Catalog(err.to_string())
    }
}

impl RewindError {
    /// Create a catalog error with a custom message
    pub fn catalog(msg: impl Into<String>) -> Self {
        RewindError::Catalog(msg.into())
    }

    /// Create a bad-state error with a custom message
    pub fn bad_state(msg: impl Into<String>) -> Self {
        RewindError::BadState(msg.into())
    }

    /// Create an IPC error with a custom message
    pub fn ipc(msg: impl Into<String>) -> Self {
        RewindError::Ipc(msg.into())
    }

    /// Create a not-found error with a custom message
    pub fn not_found(msg: impl Into<String>) -> Self {
        RewindError::NotFound(msg.into())
    }

    /// Create a duplicate error with a custom message
    pub fn duplicate(msg: impl Into<String>) -> Self {
        RewindError::Duplicate(msg.into())
    }

    /// Create an invalid-path error
    pub fn invalid_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        RewindError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Check whether this error means "per-file, keep going"
    ///
    /// The event loop and the initial scan log these and continue; they
    /// never terminate the daemon.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            RewindError::Io(_) | RewindError::InvalidPath { .. } | RewindError::NotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RewindError::NotFound("version 3 of a.txt".to_string());
        assert_eq!(err.to_string(), "not found: version 3 of a.txt");

        let err = RewindError::invalid_path("/no/such", "does not exist");
        assert!(err.to_string().contains("/no/such"));
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_per_file_classification() {
        assert!(RewindError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "gone"
        ))
        .is_per_file());
        assert!(!RewindError::Catalog("corrupt".to_string()).is_per_file());
    }
}
