//! Scratch area and publish step
//!
//! An export pass renders everything into the staging directory, then
//! mirrors it onto the output root: new or changed files are copied with
//! their mtimes, entries missing from staging are deleted, and excluded
//! names are never touched on either side.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::assets::{DEFAULT_ASSETS_DIR, EDITOR_PRIVATE_DIR};
use crate::error::{SyncError, SyncResult};
use crate::timestamp::{mtime, set_mtime};

/// Counts from one publish
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PublishStats {
    pub copied: usize,
    pub removed: usize,
}

/// Names the publish step neither copies nor deletes
fn is_excluded(name: &str, is_dir: bool) -> bool {
    (is_dir && (name == DEFAULT_ASSETS_DIR || name == EDITOR_PRIVATE_DIR))
        || name.starts_with(".Ulysses")
        || name.ends_with(".Ulysses_Public_Filter")
}

/// The shared scratch directory
#[derive(Debug, Clone)]
pub struct Staging {
    dir: PathBuf,
}

impl Staging {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Empty the staging directory, creating it if needed
    pub fn reset(&self) -> SyncResult<()> {
        if self.dir.parent().is_none() {
            return Err(SyncError::from_io(
                io::Error::new(io::ErrorKind::InvalidInput, "refusing to clear a root directory"),
                &self.dir,
            ));
        }
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir).map_err(|e| SyncError::from_io(e, &self.dir))?;
        }
        fs::create_dir_all(&self.dir).map_err(|source| SyncError::CreateDirectory {
            path: self.dir.clone(),
            source,
        })
    }

    /// Mirror staging onto `out_root`
    pub fn publish(&self, out_root: &Path) -> SyncResult<PublishStats> {
        let mut stats = PublishStats::default();
        mirror(&self.dir, out_root, &mut stats)?;
        debug!(
            "Published {:?}: {} copied, {} removed",
            out_root, stats.copied, stats.removed
        );
        Ok(stats)
    }
}

fn create_dir(path: &Path) -> SyncResult<()> {
    fs::create_dir_all(path).map_err(|source| SyncError::CreateDirectory {
        path: path.to_path_buf(),
        source,
    })
}

fn sorted_entries(dir: &Path) -> SyncResult<Vec<fs::DirEntry>> {
    let mut entries = fs::read_dir(dir)
        .map_err(|e| SyncError::from_io(e, dir))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| SyncError::from_io(e, dir))?;
    entries.sort_by_key(|e| e.file_name());
    Ok(entries)
}

fn same_file(source: &Path, dest: &Path) -> bool {
    let (Ok(a), Ok(b)) = (fs::metadata(source), fs::metadata(dest)) else {
        return false;
    };
    a.len() == b.len() && mtime(source) == mtime(dest)
}

fn remove_any(path: &Path) -> SyncResult<()> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| SyncError::from_io(e, path))
}

fn mirror(source: &Path, dest: &Path, stats: &mut PublishStats) -> SyncResult<()> {
    create_dir(dest)?;

    let entries = sorted_entries(source)?;
    for entry in &entries {
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        let is_dir = entry.path().is_dir();
        if is_excluded(&name_str, is_dir) {
            continue;
        }
        let target = dest.join(&name);
        if is_dir {
            if target.exists() && !target.is_dir() {
                remove_any(&target)?;
            }
            mirror(&entry.path(), &target, stats)?;
        } else {
            if target.is_dir() {
                remove_any(&target)?;
            }
            if !same_file(&entry.path(), &target) {
                copy_file(&entry.path(), &target)?;
                stats.copied += 1;
            }
        }
    }

    for entry in sorted_entries(dest)? {
        let name = entry.file_name();
        let is_dir = entry.path().is_dir();
        if is_excluded(&name.to_string_lossy(), is_dir) {
            continue;
        }
        if !source.join(&name).exists() {
            remove_any(&entry.path())?;
            stats.removed += 1;
        }
    }

    if let Some(at) = mtime(source) {
        set_mtime(dest, at).map_err(|e| SyncError::from_io(e, dest))?;
    }
    Ok(())
}

/// Copy one file, keeping its mtime
pub fn copy_file(source: &Path, dest: &Path) -> SyncResult<()> {
    fs::copy(source, dest).map_err(|e| SyncError::from_io(e, dest))?;
    if let Some(at) = mtime(source) {
        set_mtime(dest, at).map_err(|e| SyncError::from_io(e, dest))?;
    }
    Ok(())
}

/// Copy a directory tree into a new directory, keeping mtimes
///
/// Fails with [`SyncError::AlreadyExists`] when `dest` exists.
pub fn copy_tree(source: &Path, dest: &Path) -> SyncResult<()> {
    if let Some(parent) = dest.parent() {
        create_dir(parent)?;
    }
    fs::create_dir(dest).map_err(|e| SyncError::from_io(e, dest))?;
    for entry in sorted_entries(source)? {
        let target = dest.join(entry.file_name());
        if entry.path().is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            copy_file(&entry.path(), &target)?;
        }
    }
    if let Some(at) = mtime(source) {
        set_mtime(dest, at).map_err(|e| SyncError::from_io(e, dest))?;
    }
    Ok(())
}
