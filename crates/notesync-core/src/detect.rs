//! Change detection in both directions
//!
//! Export: a note needs rendering unless its published copy is at least as
//! new as the note. Import: a file changed if its mtime is past the last
//! sync pass.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::assets::EDITOR_PRIVATE_DIR;
use crate::convert::bundle::{is_bundle_dir_name, Bundle, BUNDLE_EXTENSION};
use crate::models::ExportFormat;
use crate::timestamp::mtime;

/// File extensions picked up by the import scan
pub const IMPORT_EXTENSIONS: [&str; 3] = ["md", "txt", "markdown"];

/// An up-to-date published copy that can be carried over as-is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reusable {
    File(PathBuf),
    Bundle(PathBuf),
}

fn with_suffix(base: &Path, extension: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

/// `<base>.md`
pub fn flat_path(base: &Path) -> PathBuf {
    with_suffix(base, "md")
}

/// `<base>.textbundle`
pub fn bundle_path(base: &Path) -> PathBuf {
    with_suffix(base, BUNDLE_EXTENSION)
}

fn fresh(path: &Path, modified: DateTime<Utc>) -> bool {
    mtime(path).map_or(false, |t| t >= modified)
}

/// Published copy of a note at `published_base` (no extension) that is
/// still current, if any
///
/// Bundles are judged by the directory's mtime. In bundle format a plain
/// `.md` copy counts too, since notes without images are written flat.
pub fn reusable_copy(
    published_base: &Path,
    format: ExportFormat,
    modified: DateTime<Utc>,
) -> Option<Reusable> {
    if format == ExportFormat::Bundle {
        let bundle = bundle_path(published_base);
        if bundle.is_dir() {
            return fresh(&bundle, modified).then_some(Reusable::Bundle(bundle));
        }
    }
    let flat = flat_path(published_base);
    (flat.is_file() && fresh(&flat, modified)).then_some(Reusable::File(flat))
}

/// A file edited since the last sync pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
    /// Set when the file is a bundle's text
    pub bundle: Option<Bundle>,
}

fn is_importable(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| IMPORT_EXTENSIONS.contains(&ext))
}

/// Every importable file under `root` modified after `since`
///
/// The editor-private folder is skipped.
pub fn changed_files(root: &Path, since: DateTime<Utc>) -> Vec<ChangedFile> {
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != EDITOR_PRIVATE_DIR);

    walker
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() && is_importable(entry.path()))
        .filter_map(|entry| {
            let modified = mtime(entry.path())?;
            if modified <= since {
                return None;
            }
            let bundle = entry
                .path()
                .parent()
                .filter(|parent| is_bundle_dir_name(parent))
                .map(Bundle::new);
            Some(ChangedFile {
                path: entry.into_path(),
                modified,
                bundle,
            })
        })
        .collect()
}
