//! Sync error handling
//!
//! Typed errors for the file and store operations of a sync pass. I/O errors
//! are classified by kind so callers can tell a recoverable, local failure
//! (a single copy, a single note) from one that should abort the pass.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading the store or touching the mirror
#[derive(Error, Debug)]
pub enum SyncError {
    /// Failed to create a directory in the mirror, backup or staging area
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Permission denied accessing path
    #[error("Permission denied: cannot access '{path}'. Check file permissions.")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Disk is full or quota exceeded
    #[error(
        "Disk full or quota exceeded while writing to '{path}'. Free up disk space and try again."
    )]
    DiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Destination already exists (bundle name collision)
    #[error("'{path}' already exists")]
    AlreadyExists {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to read file
    #[error("Failed to read '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to write file
    #[error("Failed to write '{path}': {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// File not found (when expected to exist)
    #[error("File not found: '{path}'")]
    NotFound { path: PathBuf },

    /// Store database error
    #[error("Store database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Bundle metadata could not be parsed or written
    #[error("Invalid bundle metadata in '{path}': {source}")]
    BundleInfo {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SyncError {
    /// Create an error from an I/O error with path context
    ///
    /// Classifies the error based on its kind (permission, disk full, etc.)
    pub fn from_io(error: io::Error, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match error.kind() {
            io::ErrorKind::PermissionDenied => SyncError::PermissionDenied {
                path,
                source: error,
            },
            io::ErrorKind::NotFound => SyncError::NotFound { path },
            io::ErrorKind::AlreadyExists => SyncError::AlreadyExists {
                path,
                source: error,
            },
            _ if is_disk_full_error(&error) => SyncError::DiskFull {
                path,
                source: error,
            },
            _ => SyncError::WriteError {
                path,
                source: error,
            },
        }
    }

    /// Check if the failure is local to one file or note
    ///
    /// Recoverable errors are logged and the pass continues with the next
    /// item; everything else aborts the current phase.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SyncError::AlreadyExists { .. }
                | SyncError::NotFound { .. }
                | SyncError::ReadError { .. }
                | SyncError::BundleInfo { .. }
        )
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            SyncError::DiskFull { .. } => Some("Free up disk space and try again."),
            SyncError::PermissionDenied { .. } => Some(
                "Check file and directory permissions. The store database may require Full Disk Access.",
            ),
            SyncError::CreateDirectory { .. } => {
                Some("Check that the parent directory exists and you have write permissions.")
            }
            SyncError::Database(_) => {
                Some("Check that store_db points at the note store database.")
            }
            _ => None,
        }
    }
}

/// Check if an I/O error indicates disk full condition
fn is_disk_full_error(error: &io::Error) -> bool {
    let msg = error.to_string().to_lowercase();
    msg.contains("no space left")
        || msg.contains("disk full")
        || msg.contains("quota exceeded")
        || msg.contains("not enough space")
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;
