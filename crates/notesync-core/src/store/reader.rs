//! Read side of the record store
//!
//! Queries the store's SQLite database directly. Export passes read from a
//! snapshot copy in the staging area so a long pass never holds the live
//! database open; conflict checks and title recovery always read live.
//!
//! ## Tables
//!
//! - `ZSFNOTE` - one row per note
//! - `ZSFNOTEFILE` - attachment table, keyed by owning note (`ZNOTE`)

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};
use crate::models::{Attachment, NoteRecord};
use crate::timestamp::from_store_seconds;

const SNAPSHOT_NAME: &str = "database_copy.sqlite";

const NOTE_COLUMNS: &str = "Z_PK, ZUNIQUEIDENTIFIER, ZTITLE, ZTEXT, ZCREATIONDATE, \
                            ZMODIFICATIONDATE, ZTRASHED, ZARCHIVED";

/// Read-only view of the note store
///
/// Fields drop in order: the connection is closed before the snapshot
/// files are removed.
pub struct NoteStore {
    conn: Connection,
    snapshot: SnapshotFiles,
}

/// Snapshot files, removed on drop
#[derive(Debug, Default)]
struct SnapshotFiles(Vec<PathBuf>);

impl Drop for SnapshotFiles {
    fn drop(&mut self) {
        for file in &self.0 {
            if file.exists() {
                if let Err(e) = fs::remove_file(file) {
                    debug!("Failed to remove store snapshot {:?}: {}", file, e);
                }
            }
        }
    }
}

impl NoteStore {
    /// Open the live store database
    pub fn open(path: &Path) -> SyncResult<Self> {
        if !path.exists() {
            return Err(SyncError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let conn = Connection::open(path)?;
        Ok(Self {
            conn,
            snapshot: SnapshotFiles::default(),
        })
    }

    /// Open a snapshot copy of the store inside `scratch`
    ///
    /// Falls back to the live database when the copy fails.
    pub fn open_snapshot(path: &Path, scratch: &Path) -> SyncResult<Self> {
        match copy_snapshot(path, scratch) {
            Ok(files) => {
                debug!("Reading store snapshot {:?}", files[0]);
                let conn = Connection::open(&files[0])?;
                Ok(Self {
                    conn,
                    snapshot: SnapshotFiles(files),
                })
            }
            Err(e) => {
                warn!("Could not copy store database, reading live store: {}", e);
                Self::open(path)
            }
        }
    }

    /// Wrap an existing connection (for testing)
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            snapshot: SnapshotFiles::default(),
        }
    }

    /// Whether this store reads from a snapshot copy
    pub fn is_snapshot(&self) -> bool {
        !self.snapshot.0.is_empty()
    }

    /// All notes that are neither trashed nor archived
    pub fn active_notes(&self) -> SyncResult<Vec<NoteRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM ZSFNOTE WHERE ZTRASHED = 0 AND ZARCHIVED = 0",
            NOTE_COLUMNS
        ))?;
        let notes = stmt
            .query_map([], note_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notes)
    }

    /// Get a note by identifier, whatever its state
    pub fn note(&self, id: &str) -> SyncResult<Option<NoteRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM ZSFNOTE WHERE ZUNIQUEIDENTIFIER = ?",
            NOTE_COLUMNS
        ))?;
        Ok(stmt.query_row(params![id], note_from_row).optional()?)
    }

    /// Attachment table of one note
    pub fn attachments(&self, note_pk: i64) -> SyncResult<Vec<Attachment>> {
        let mut stmt = self
            .conn
            .prepare("SELECT ZFILENAME, ZUNIQUEIDENTIFIER FROM ZSFNOTEFILE WHERE ZNOTE = ?")?;
        let rows = stmt
            .query_map(params![note_pk], |row| {
                Ok(Attachment {
                    filename: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    id: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Attachment table of one note keyed by filename
    pub fn attachment_map(&self, note_pk: i64) -> SyncResult<HashMap<String, String>> {
        Ok(self
            .attachments(note_pk)?
            .into_iter()
            .filter(|a| !a.filename.is_empty() && !a.id.is_empty())
            .map(|a| (a.filename, a.id))
            .collect())
    }

    /// Current modification time of a non-trashed note
    pub fn modified_at(&self, id: &str) -> SyncResult<Option<DateTime<Utc>>> {
        let seconds: Option<f64> = self
            .conn
            .query_row(
                "SELECT ZMODIFICATIONDATE FROM ZSFNOTE WHERE ZTRASHED = 0 AND ZUNIQUEIDENTIFIER = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(seconds.map(from_store_seconds))
    }

    /// Identifier of the most recently modified active note with this exact title
    pub fn lookup_id_by_title(&self, title: &str) -> SyncResult<Option<String>> {
        if title.is_empty() {
            return Ok(None);
        }
        let id = self
            .conn
            .query_row(
                "SELECT ZUNIQUEIDENTIFIER FROM ZSFNOTE \
                 WHERE ZTRASHED = 0 AND ZARCHIVED = 0 AND ZTITLE = ? \
                 ORDER BY ZMODIFICATIONDATE DESC LIMIT 1",
                params![title],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }
}

/// Copy the database (and its write-ahead log when present) into `scratch`
fn copy_snapshot(path: &Path, scratch: &Path) -> SyncResult<Vec<PathBuf>> {
    fs::create_dir_all(scratch).map_err(|source| SyncError::CreateDirectory {
        path: scratch.to_path_buf(),
        source,
    })?;

    let target = scratch.join(SNAPSHOT_NAME);
    fs::copy(path, &target).map_err(|e| SyncError::from_io(e, path))?;
    let mut files = vec![target];

    let wal = sidecar(path, "-wal");
    if wal.exists() {
        let wal_target = sidecar(&files[0], "-wal");
        fs::copy(&wal, &wal_target).map_err(|e| SyncError::from_io(e, &wal))?;
        files.push(wal_target);
    }
    // SQLite may create a shared-memory file next to the copy
    files.push(sidecar(&files[0], "-shm"));
    Ok(files)
}

/// `database.sqlite` → `database.sqlite-wal` and friends
pub(crate) fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn note_from_row(row: &Row<'_>) -> rusqlite::Result<NoteRecord> {
    Ok(NoteRecord {
        pk: row.get(0)?,
        id: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        title: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        body: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        created: from_store_seconds(row.get::<_, Option<f64>>(4)?.unwrap_or_default()),
        modified: from_store_seconds(row.get::<_, Option<f64>>(5)?.unwrap_or_default()),
        trashed: row.get::<_, Option<i64>>(6)?.unwrap_or_default() != 0,
        archived: row.get::<_, Option<i64>>(7)?.unwrap_or_default() != 0,
    })
}
