//! Attachment reconciliation
//!
//! Export copies attachment bytes out of the store's image folder and points
//! image links at the copies. Import resolves image links in edited files and
//! uploads anything the store doesn't already own.
//!
//! Copies are incremental: a destination whose mtime is at least the
//! source's is left alone.

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use regex::Captures;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::convert::links::{
    is_remote, is_store_managed, LEGACY_IMAGE_RE, MD_IMAGE_RE, WIKI_IMAGE_RE,
};
use crate::error::{SyncError, SyncResult};
use crate::store::{decode_path, encode_path, CommandSink, NoteTarget, StoreCommand};
use crate::timestamp::{mtime, set_mtime};

/// Attachment folder created under a flat export root by default
pub const DEFAULT_ASSETS_DIR: &str = "BearImages";

/// Editor-private folder skipped by every scan
pub const EDITOR_PRIVATE_DIR: &str = ".obsidian";

/// Whether `text` references any image
pub fn has_images(text: &str) -> bool {
    LEGACY_IMAGE_RE.is_match(text) || MD_IMAGE_RE.is_match(text)
}

/// Last path segment of a decoded link target
fn basename(target: &str) -> &str {
    target.rsplit('/').next().unwrap_or(target)
}

/// Copies attachments for one export pass and counts the copies made
#[derive(Debug)]
pub struct AssetReconciler {
    store_images: PathBuf,
    copied: usize,
}

impl AssetReconciler {
    pub fn new(store_images: impl Into<PathBuf>) -> Self {
        Self {
            store_images: store_images.into(),
            copied: 0,
        }
    }

    /// Files copied so far
    pub fn copied(&self) -> usize {
        self.copied
    }

    /// Copy `source` to `dest` unless `dest` is at least as new
    ///
    /// The copy keeps the source's mtime. Returns whether bytes were copied.
    pub fn copy_incremental(&mut self, source: &Path, dest: &Path) -> SyncResult<bool> {
        let Some(source_time) = mtime(source) else {
            return Err(SyncError::NotFound {
                path: source.to_path_buf(),
            });
        };
        if mtime(dest).map_or(false, |dest_time| dest_time >= source_time) {
            return Ok(false);
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|source| SyncError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::copy(source, dest).map_err(|e| SyncError::from_io(e, dest))?;
        set_mtime(dest, source_time).map_err(|e| SyncError::from_io(e, dest))?;
        self.copied += 1;
        debug!("Copied attachment {:?}", dest);
        Ok(true)
    }

    /// Copy, logging instead of failing
    fn copy_logged(&mut self, source: &Path, dest: &Path) {
        if let Err(e) = self.copy_incremental(source, dest) {
            warn!("Attachment not copied: {}", e);
        }
    }

    /// Rewrite image links to the shared attachment folder (flat format)
    ///
    /// Links become `<rel_assets>/<attachment-id>/<file>`, percent-encoded;
    /// the bytes go to `assets_root/<attachment-id>/<file>`. Remote links,
    /// links already in the folder and unknown filenames are left unchanged.
    pub fn link_to_repository(
        &mut self,
        text: &str,
        attachments: &HashMap<String, String>,
        assets_root: &Path,
        rel_assets: &str,
    ) -> String {
        let text = LEGACY_IMAGE_RE.replace_all(text, |caps: &Captures| {
            let (id, file) = (&caps[1], &caps[2]);
            let source = self.store_images.join(id).join(file);
            self.copy_logged(&source, &assets_root.join(id).join(file));
            format!("![]({})", encode_path(&format!("{}/{}/{}", rel_assets, id, file)))
        });

        let repository_prefix = format!("{}/", rel_assets);
        MD_IMAGE_RE
            .replace_all(&text, |caps: &Captures| {
                let url = &caps[2];
                if is_remote(url) {
                    return caps[0].to_string();
                }
                let decoded = decode_path(url);
                if decoded.starts_with(&repository_prefix) {
                    return caps[0].to_string();
                }
                let file = basename(&decoded);
                let Some(id) = attachments.get(file) else {
                    return caps[0].to_string();
                };
                let source = self.store_images.join(id).join(file);
                self.copy_logged(&source, &assets_root.join(id).join(file));
                format!(
                    "![{}]({})",
                    &caps[1],
                    encode_path(&format!("{}/{}/{}", rel_assets, id, file))
                )
            })
            .into_owned()
    }

    /// Rewrite image links into a bundle's own `assets/` folder
    ///
    /// Legacy references and table-resolved attachments are copied as
    /// `assets/<attachment-id>_<file>`.
    pub fn link_into_bundle(
        &mut self,
        text: &str,
        attachments: &HashMap<String, String>,
        assets_dir: &Path,
    ) -> String {
        let text = LEGACY_IMAGE_RE.replace_all(text, |caps: &Captures| {
            let (id, file) = (&caps[1], &caps[2]);
            let name = format!("{}_{}", id, file);
            let source = self.store_images.join(id).join(file);
            self.copy_logged(&source, &assets_dir.join(&name));
            format!("![]({})", encode_path(&format!("assets/{}", name)))
        });

        MD_IMAGE_RE
            .replace_all(&text, |caps: &Captures| {
                let url = &caps[2];
                if is_remote(url) || url.starts_with("assets/") {
                    return caps[0].to_string();
                }
                let decoded = decode_path(url);
                let file = basename(&decoded);
                let Some(id) = attachments.get(file) else {
                    return caps[0].to_string();
                };
                let name = format!("{}_{}", id, file);
                let source = self.store_images.join(id).join(file);
                self.copy_logged(&source, &assets_dir.join(&name));
                format!("![{}]({})", &caps[1], encode_path(&format!("assets/{}", name)))
            })
            .into_owned()
    }
}

/// Filename → path index over an export root, built once per import pass
///
/// On duplicate names the shallowest file wins.
#[derive(Debug, Default)]
pub struct VaultIndex {
    files: HashMap<String, (usize, PathBuf)>,
}

impl VaultIndex {
    pub fn build(root: &Path) -> Self {
        let mut files: HashMap<String, (usize, PathBuf)> = HashMap::new();
        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.file_name() != EDITOR_PRIVATE_DIR);
        for entry in walker.filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let depth = entry.depth();
            let shallower = files.get(&name).map_or(true, |(d, _)| depth < *d);
            if shallower {
                files.insert(name, (depth, entry.into_path()));
            }
        }
        Self { files }
    }

    pub fn get(&self, name: &str) -> Option<&Path> {
        self.files.get(name).map(|(_, path)| path.as_path())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Resolves and uploads images referenced by an edited file
pub struct ImageImporter<'a> {
    out_root: &'a Path,
    index: &'a VaultIndex,
    sink: &'a dyn CommandSink,
}

impl<'a> ImageImporter<'a> {
    pub fn new(out_root: &'a Path, index: &'a VaultIndex, sink: &'a dyn CommandSink) -> Self {
        Self {
            out_root,
            index,
            sink,
        }
    }

    /// Locate an image: next to the file, in the default attachment
    /// folder, then anywhere in the export root
    pub fn resolve(&self, file: &Path, target: &str) -> Option<PathBuf> {
        let dir = file.parent().unwrap_or(self.out_root);
        let beside = lexical_join(dir, target);
        if beside.is_file() {
            return Some(beside);
        }
        let name = basename(target);
        let in_folder = self.out_root.join(DEFAULT_ASSETS_DIR).join(name);
        if in_folder.is_file() {
            return Some(in_folder);
        }
        self.index.get(name).map(Path::to_path_buf)
    }

    /// Upload new images for `note` and rewrite links to bare filenames
    ///
    /// Images already owned by the store are not uploaded again. Without a
    /// target, links are rewritten but nothing is sent.
    pub fn import(&self, text: &str, file: &Path, note: Option<&NoteTarget>) -> String {
        let text = MD_IMAGE_RE.replace_all(text, |caps: &Captures| {
            self.import_one(&caps[1], &caps[2], file, note)
        });
        WIKI_IMAGE_RE
            .replace_all(&text, |caps: &Captures| {
                self.import_one("image", &caps[1], file, note)
            })
            .into_owned()
    }

    fn import_one(&self, alt: &str, url: &str, file: &Path, note: Option<&NoteTarget>) -> String {
        if is_remote(url) {
            return format!("![{}]({})", alt, url);
        }
        let decoded = decode_path(url);
        let Some(path) = self.resolve(file, &decoded) else {
            debug!("Image {:?} not found for {:?}", decoded, file);
            return format!("![{}]({})", alt, encode_path(&decoded));
        };
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| basename(&decoded).to_string());

        if let Some(target) = note {
            if !is_store_managed(&decoded.replace('\\', "/")) {
                self.upload(target, &filename, &path);
            }
        }
        format!("![{}]({})", alt, encode_path(&filename))
    }

    /// Send one file's bytes to the store
    pub fn upload(&self, target: &NoteTarget, filename: &str, path: &Path) {
        match fs::read(path) {
            Ok(data) => self.sink.dispatch(StoreCommand::AddFile {
                target: target.clone(),
                filename: filename.to_string(),
                data,
            }),
            Err(e) => warn!("Image upload failed for {}: {}", filename, e),
        }
    }
}

/// Join and drop `.`/`..` without touching the file system
fn lexical_join(base: &Path, relative: &str) -> PathBuf {
    let mut out = base.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Path of the attachment root as written into flat links
pub fn relative_assets(out_root: &Path, assets_root: &Path) -> String {
    match assets_root.strip_prefix(out_root) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel.to_string_lossy().replace('\\', "/"),
        Ok(_) => ".".to_string(),
        Err(_) => relative_path(out_root, assets_root),
    }
}

/// `to` relative to `from`, both taken lexically
fn relative_path(from: &Path, to: &Path) -> String {
    let from: Vec<Component> = from.components().collect();
    let to: Vec<Component> = to.components().collect();
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();
    let mut parts: Vec<String> = vec!["..".to_string(); from.len() - common];
    parts.extend(
        to[common..]
            .iter()
            .map(|c| c.as_os_str().to_string_lossy().into_owned()),
    );
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}
