//! Bundle (`.textbundle`) layout
//!
//! ```text
//! Plan.textbundle/
//!   text.md      body with the identity marker appended
//!   info.json    bundle metadata, including the note identifier
//!   .bearid      identifier side-file
//!   assets/      attachments as <attachment-id>_<filename>
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{SyncError, SyncResult};
use crate::timestamp::{set_mtime, write_stamped};

pub const BUNDLE_EXTENSION: &str = "textbundle";
pub const TEXT_FILE: &str = "text.md";
pub const INFO_FILE: &str = "info.json";
pub const ID_FILE: &str = ".bearid";
pub const ASSETS_DIR: &str = "assets";

const BUNDLE_TYPE: &str = "net.daringfireball.markdown";
const CREATOR: &str = "net.shinyfrog.bear";

/// Contents of `info.json`
///
/// Keys written by other editors are kept in `extra` and written back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleInfo {
    #[serde(default)]
    pub transient: bool,
    #[serde(rename = "type", default = "default_type")]
    pub kind: String,
    #[serde(rename = "creatorIdentifier", default = "default_creator")]
    pub creator_identifier: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bear_uuid: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_type() -> String {
    BUNDLE_TYPE.to_string()
}

fn default_creator() -> String {
    CREATOR.to_string()
}

fn default_version() -> u32 {
    2
}

impl BundleInfo {
    pub fn for_note(id: &str) -> Self {
        Self {
            transient: true,
            kind: default_type(),
            creator_identifier: default_creator(),
            version: default_version(),
            bear_uuid: Some(id.to_string()),
            extra: Map::new(),
        }
    }
}

/// A bundle directory on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    root: PathBuf,
}

impl Bundle {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The bundle containing `path`, if any component is a bundle directory
    pub fn containing(path: &Path) -> Option<Self> {
        path.ancestors()
            .find(|p| is_bundle_dir_name(p))
            .map(Self::new)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn text_path(&self) -> PathBuf {
        self.root.join(TEXT_FILE)
    }

    pub fn info_path(&self) -> PathBuf {
        self.root.join(INFO_FILE)
    }

    pub fn id_path(&self) -> PathBuf {
        self.root.join(ID_FILE)
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.root.join(ASSETS_DIR)
    }

    /// Bundle name without the extension
    pub fn title(&self) -> String {
        self.root
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn read_text(&self) -> SyncResult<String> {
        let path = self.text_path();
        fs::read_to_string(&path).map_err(|e| SyncError::from_io(e, path))
    }

    /// Identifier from the side-file
    pub fn read_id_file(&self) -> Option<String> {
        fs::read_to_string(self.id_path())
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Parsed `info.json`; a missing file reads as `None`
    pub fn read_info(&self) -> SyncResult<Option<BundleInfo>> {
        let path = self.info_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SyncError::from_io(e, path)),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| SyncError::BundleInfo { path, source })
    }

    /// Write a complete bundle for note `id`, stamped with `modified`
    ///
    /// The directory's own mtime is set last so it reflects the note.
    pub fn write(&self, text: &str, id: &str, modified: DateTime<Utc>) -> SyncResult<()> {
        let assets = self.assets_dir();
        fs::create_dir_all(&assets).map_err(|e| SyncError::from_io(e, &assets))?;
        let text_path = self.text_path();
        write_stamped(&text_path, text.as_bytes(), Some(modified))
            .map_err(|e| SyncError::from_io(e, &text_path))?;
        self.write_id_file(id)?;
        self.write_info(&BundleInfo::for_note(id), Some(modified))?;
        set_mtime(&self.root, modified).map_err(|e| SyncError::from_io(e, &self.root))?;
        Ok(())
    }

    pub fn write_id_file(&self, id: &str) -> SyncResult<()> {
        let path = self.id_path();
        fs::write(&path, id).map_err(|e| SyncError::from_io(e, path))
    }

    fn write_info(&self, info: &BundleInfo, modified: Option<DateTime<Utc>>) -> SyncResult<()> {
        let path = self.info_path();
        let json = serde_json::to_string_pretty(info)
            .map_err(|source| SyncError::BundleInfo { path: path.clone(), source })?;
        write_stamped(&path, json.as_bytes(), modified).map_err(|e| SyncError::from_io(e, path))?;
        Ok(())
    }

    /// Record `id` in both the side-file and `info.json`
    ///
    /// Other `info.json` keys survive; an unreadable `info.json` is replaced.
    pub fn record_identity(&self, id: &str) -> SyncResult<()> {
        self.write_id_file(id)?;
        let mut info = match self.read_info() {
            Ok(Some(info)) => info,
            Ok(None) | Err(SyncError::BundleInfo { .. }) => BundleInfo::for_note(id),
            Err(e) => return Err(e),
        };
        if info.bear_uuid.as_deref() == Some(id) {
            return Ok(());
        }
        info.bear_uuid = Some(id.to_string());
        self.write_info(&info, None)
    }
}

/// Whether this path's last component is a bundle directory name
pub fn is_bundle_dir_name(path: &Path) -> bool {
    path.extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case(BUNDLE_EXTENSION))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::{from_unix_seconds, mtime};
    use tempfile::TempDir;

    #[test]
    fn test_write_bundle_layout() {
        let dir = TempDir::new().unwrap();
        let bundle = Bundle::new(dir.path().join("Plan.textbundle"));
        let modified = from_unix_seconds(1_700_000_000.0);

        bundle.write("Plan\nbody\n", "ID1", modified).unwrap();

        assert_eq!(bundle.read_text().unwrap(), "Plan\nbody\n");
        assert_eq!(bundle.read_id_file().as_deref(), Some("ID1"));
        let info = bundle.read_info().unwrap().unwrap();
        assert_eq!(info.bear_uuid.as_deref(), Some("ID1"));
        assert_eq!(info.kind, "net.daringfireball.markdown");
        assert_eq!(mtime(bundle.root()), Some(modified));
        assert_eq!(mtime(&bundle.text_path()), Some(modified));
        assert_eq!(bundle.title(), "Plan");
    }

    #[test]
    fn test_record_identity_preserves_foreign_keys() {
        let dir = TempDir::new().unwrap();
        let bundle = Bundle::new(dir.path().join("Plan.textbundle"));
        fs::create_dir_all(bundle.root()).unwrap();
        fs::write(
            bundle.info_path(),
            r#"{"version": 2, "type": "net.daringfireball.markdown", "com.ulyssesapp": {"x": 1}}"#,
        )
        .unwrap();

        bundle.record_identity("ID2").unwrap();

        let info = bundle.read_info().unwrap().unwrap();
        assert_eq!(info.bear_uuid.as_deref(), Some("ID2"));
        assert!(info.extra.contains_key("com.ulyssesapp"));
        assert_eq!(bundle.read_id_file().as_deref(), Some("ID2"));
    }

    #[test]
    fn test_record_identity_replaces_broken_info() {
        let dir = TempDir::new().unwrap();
        let bundle = Bundle::new(dir.path().join("Plan.textbundle"));
        fs::create_dir_all(bundle.root()).unwrap();
        fs::write(bundle.info_path(), "not json").unwrap();

        assert!(bundle.read_info().is_err());
        bundle.record_identity("ID3").unwrap();
        assert_eq!(
            bundle.read_info().unwrap().unwrap().bear_uuid.as_deref(),
            Some("ID3")
        );
    }

    #[test]
    fn test_missing_info_reads_as_none() {
        let dir = TempDir::new().unwrap();
        let bundle = Bundle::new(dir.path().join("Empty.textbundle"));
        assert!(bundle.read_info().unwrap().is_none());
        assert!(bundle.read_id_file().is_none());
    }

    #[test]
    fn test_containing_bundle() {
        let path = Path::new("/out/work/Plan.textbundle/assets/a.png");
        let bundle = Bundle::containing(path).unwrap();
        assert_eq!(bundle.root(), Path::new("/out/work/Plan.textbundle"));
        assert!(Bundle::containing(Path::new("/out/work/Plan.md")).is_none());
    }
}
