//! Conflict detection and backups
//!
//! A file edit conflicts with the store when the store's copy of the note
//! changed after the last export. The check reads the store's modification
//! time, so it must happen before anything else touches the note (attachment
//! uploads bump that time too).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{info, warn};

use crate::convert::bundle::Bundle;
use crate::convert::clean_title;
use crate::platform;
use crate::detect::ChangedFile;
use crate::error::{SyncError, SyncResult};
use crate::pipeline::staging::{copy_file, copy_tree};
use crate::store::NoteStore;
use crate::timestamp::{backup_suffix, banner_time, write_stamped};

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#{1,6} ").expect("valid heading regex"));

/// Link that opens a note in the store application
pub fn open_note_link(id: &str) -> String {
    format!("bear://x-callback-url/open-note?id={}", id)
}

/// Two-line banner placed in a note created from a conflicting edit
pub fn conflict_banner(edited_at: DateTime<Utc>, original_id: &str) -> String {
    format!(
        "::Sync conflict! External update: {}::\n[Click here to see original Bear note]({})",
        banner_time(edited_at),
        open_note_link(original_id)
    )
}

/// Insert `line` after the first line of `text`
pub fn insert_second_line(text: &str, line: &str) -> String {
    let mut lines: Vec<&str> = text.lines().collect();
    let at = lines.len().min(1);
    lines.insert(at, line);
    lines.join("\n")
}

/// Next free `<stem><suffix>` path, then `<stem> - 02<suffix>`, `- 03`, ...
fn free_path(dir: &Path, stem: &str, suffix: &str) -> PathBuf {
    let first = dir.join(format!("{}{}", stem, suffix));
    if !first.exists() {
        return first;
    }
    (2..)
        .map(|n| dir.join(format!("{} - {:02}{}", stem, n, suffix)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

/// Conflict checks and backups for one import pass
pub struct ConflictResolver<'a> {
    store: &'a NoteStore,
    backup_root: &'a Path,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(store: &'a NoteStore, backup_root: &'a Path) -> Self {
        Self { store, backup_root }
    }

    /// Whether the store changed note `id` after `last_export`
    ///
    /// A failed query counts as no conflict.
    pub fn is_conflict(&self, id: &str, last_export: DateTime<Utc>) -> bool {
        match self.store.modified_at(id) {
            Ok(Some(modified)) => modified > last_export,
            Ok(None) => false,
            Err(e) => {
                warn!("Conflict check failed for {}: {}", id, e);
                false
            }
        }
    }

    /// Save the store's current copy of note `id` before it is replaced
    ///
    /// The copy is named after the title and creation time, starts with a
    /// link back to the live note, and carries the note's modification time.
    /// Returns the backup path, or `None` when the note doesn't exist.
    pub fn backup_store_note(&self, id: &str) -> SyncResult<Option<PathBuf>> {
        let Some(note) = self.store.note(id)? else {
            return Ok(None);
        };

        let body = note.body.trim_end();
        let first = body.lines().next().unwrap_or_default();
        let link = format!(
            "::Link to updated note: [{}]({})::",
            HEADING_RE.replace(first, ""),
            open_note_link(id)
        );
        let text = insert_second_line(body, &link);

        fs::create_dir_all(self.backup_root).map_err(|source| SyncError::CreateDirectory {
            path: self.backup_root.to_path_buf(),
            source,
        })?;
        let stem = format!("{}{}", clean_title(&note.title), backup_suffix(note.created));
        let path = free_path(self.backup_root, &stem, ".txt");
        let is_new = write_stamped(&path, text.as_bytes(), Some(note.modified))
            .map_err(|e| SyncError::from_io(e, &path))?;
        if is_new {
            platform::set_creation_date(&path, note.created);
        }
        info!("Original to backup: {:?}", path.file_name().unwrap_or_default());
        Ok(Some(path))
    }

    /// Copy an edited file (or its whole bundle) into the backup root
    pub fn backup_file(&self, changed: &ChangedFile) -> SyncResult<PathBuf> {
        fs::create_dir_all(self.backup_root).map_err(|source| SyncError::CreateDirectory {
            path: self.backup_root.to_path_buf(),
            source,
        })?;
        match &changed.bundle {
            Some(bundle) => self.backup_bundle(bundle),
            None => {
                let name = changed.path.file_name().unwrap_or_default();
                let target = self.backup_root.join(name);
                copy_file(&changed.path, &target)?;
                Ok(target)
            }
        }
    }

    fn backup_bundle(&self, bundle: &Bundle) -> SyncResult<PathBuf> {
        let target = free_path(self.backup_root, &bundle.title(), ".textbundle");
        copy_tree(bundle.root(), &target)?;
        Ok(target)
    }
}
