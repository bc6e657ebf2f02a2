//! Sync state persistence
//!
//! Two marker files per output root record the last completed sync and
//! export passes. Only their modification times matter; the contents are a
//! human-readable note.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};

use crate::error::{SyncError, SyncResult};
use crate::store::reader::sidecar;
use crate::timestamp::{mtime, write_stamped};

pub const SYNC_MARKER: &str = ".sync-time.log";
pub const EXPORT_MARKER: &str = ".export-time.log";

/// Marker files under one output (or staging) root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    root: PathBuf,
}

impl SyncState {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn sync_marker(&self) -> PathBuf {
        self.root.join(SYNC_MARKER)
    }

    pub fn export_marker(&self) -> PathBuf {
        self.root.join(EXPORT_MARKER)
    }

    /// When the last sync pass started
    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        mtime(&self.sync_marker())
    }

    /// When the last export was written
    pub fn last_export(&self) -> Option<DateTime<Utc>> {
        mtime(&self.export_marker())
    }

    /// Import only runs against a root that has been exported to before
    pub fn import_ready(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((self.last_sync()?, self.last_export()?))
    }

    /// Whether an export pass is needed
    ///
    /// True when the root has never been synced, or the store database
    /// changed after the last export. A change may so far exist only in the
    /// write-ahead log, so the newer of the two files counts.
    pub fn needs_export(&self, store_db: &Path) -> bool {
        if !self.sync_marker().exists() {
            return true;
        }
        let db_time = mtime(store_db).max(mtime(&sidecar(store_db, "-wal")));
        let export_time = self.last_export();
        match (db_time, export_time) {
            (Some(db), Some(export)) => db > export,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Record the start of an import pass
    pub fn mark_sync(&self, now: DateTime<Utc>) -> SyncResult<()> {
        let message = format!(
            "Checked for Markdown updates to sync at: {}",
            now.with_timezone(&Local).format("%Y-%m-%d at %H:%M:%S")
        );
        self.write_marker(&self.sync_marker(), &message, now)
    }

    /// Write both markers (into the staging area before publish)
    pub fn mark_export(&self, now: DateTime<Utc>) -> SyncResult<()> {
        let message = format!(
            "Markdown from Bear written at: {}",
            now.with_timezone(&Local).format("%Y-%m-%d at %H:%M:%S")
        );
        self.write_marker(&self.export_marker(), &message, now)?;
        self.write_marker(&self.sync_marker(), &message, now)
    }

    fn write_marker(&self, path: &Path, message: &str, at: DateTime<Utc>) -> SyncResult<()> {
        fs::create_dir_all(&self.root).map_err(|source| SyncError::CreateDirectory {
            path: self.root.clone(),
            source,
        })?;
        write_stamped(path, message.as_bytes(), Some(at)).map_err(|e| SyncError::from_io(e, path))?;
        Ok(())
    }
}
