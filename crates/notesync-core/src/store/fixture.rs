//! Store database fixtures for tests
//!
//! Builds a throwaway database with the store's table layout so readers,
//! pipelines and the conflict resolver run against real SQL.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};
use tempfile::TempDir;

use super::reader::NoteStore;
use crate::timestamp::STORE_EPOCH_OFFSET;

/// Create the subset of the store schema this crate reads
pub fn init_store_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS ZSFNOTE (
            Z_PK INTEGER PRIMARY KEY AUTOINCREMENT,
            ZUNIQUEIDENTIFIER TEXT,
            ZTITLE TEXT,
            ZTEXT TEXT,
            ZCREATIONDATE REAL,
            ZMODIFICATIONDATE REAL,
            ZTRASHED INTEGER NOT NULL DEFAULT 0,
            ZARCHIVED INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS ZSFNOTEFILE (
            Z_PK INTEGER PRIMARY KEY AUTOINCREMENT,
            ZNOTE INTEGER,
            ZFILENAME TEXT,
            ZUNIQUEIDENTIFIER TEXT
        );
        "#,
    )
}

/// A store database in a temporary directory
pub struct StoreFixture {
    dir: TempDir,
    path: PathBuf,
}

impl StoreFixture {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("database.sqlite");
        let conn = Connection::open(&path).expect("open fixture db");
        init_store_schema(&conn).expect("fixture schema");
        Self { dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn open(&self) -> NoteStore {
        NoteStore::open(&self.path).expect("open fixture store")
    }

    fn conn(&self) -> Connection {
        Connection::open(&self.path).expect("open fixture db")
    }

    /// Insert a note modified (and created) at `modified_unix`, returning its pk
    pub fn add_note(&self, id: &str, title: &str, body: &str, modified_unix: f64) -> i64 {
        let conn = self.conn();
        let store_time = modified_unix - STORE_EPOCH_OFFSET;
        conn.execute(
            "INSERT INTO ZSFNOTE (ZUNIQUEIDENTIFIER, ZTITLE, ZTEXT, ZCREATIONDATE, ZMODIFICATIONDATE) \
             VALUES (?, ?, ?, ?, ?)",
            params![id, title, body, store_time, store_time],
        )
        .expect("insert note");
        conn.last_insert_rowid()
    }

    pub fn add_attachment(&self, note_pk: i64, filename: &str, id: &str) {
        self.conn()
            .execute(
                "INSERT INTO ZSFNOTEFILE (ZNOTE, ZFILENAME, ZUNIQUEIDENTIFIER) VALUES (?, ?, ?)",
                params![note_pk, filename, id],
            )
            .expect("insert attachment");
    }

    pub fn set_flags(&self, pk: i64, trashed: bool, archived: bool) {
        self.conn()
            .execute(
                "UPDATE ZSFNOTE SET ZTRASHED = ?, ZARCHIVED = ? WHERE Z_PK = ?",
                params![trashed as i64, archived as i64, pk],
            )
            .expect("update flags");
    }

    /// Move a note's modification time, as an edit in the store would
    pub fn touch_note(&self, id: &str, modified_unix: f64) {
        self.conn()
            .execute(
                "UPDATE ZSFNOTE SET ZMODIFICATIONDATE = ? WHERE ZUNIQUEIDENTIFIER = ?",
                params![modified_unix - STORE_EPOCH_OFFSET, id],
            )
            .expect("touch note");
    }

    pub fn set_body(&self, id: &str, body: &str) {
        self.conn()
            .execute(
                "UPDATE ZSFNOTE SET ZTEXT = ? WHERE ZUNIQUEIDENTIFIER = ?",
                params![body, id],
            )
            .expect("set body");
    }
}
