//! One-direction sync passes
//!
//! - **staging**: scratch area and mirrored publish
//! - **export**: store → files
//! - **import**: files → store
//!
//! [`run`] is a complete one-shot pass for one output root: import first
//! (unless skipped), then export when the store changed.

pub mod export;
pub mod import;
pub mod staging;

use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use crate::assets::{relative_assets, DEFAULT_ASSETS_DIR};
use crate::convert::TagFilter;
use crate::models::ExportFormat;
use crate::state::SyncState;
use crate::store::{CommandSink, SettleDelays};

pub use export::{export, ExportReport};
pub use import::{import, FileTagReader, ImportReport, NoFileTags};
pub use staging::{PublishStats, Staging};

/// Everything one format-specific pass needs
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    pub out_root: PathBuf,
    /// Where conflicting and replaced notes are saved (outside `out_root`)
    pub backup_root: PathBuf,
    /// Attachment folder for flat exports; `<out_root>/BearImages` when unset
    pub assets_root: Option<PathBuf>,
    pub format: ExportFormat,
    pub skip_import: bool,
    pub skip_export: bool,
    pub exclude_tags: Vec<String>,
    pub only_export_tags: Vec<String>,
    pub hide_tags: bool,
    pub tag_folders: bool,
    pub store_db: PathBuf,
    pub store_images: PathBuf,
    pub staging_dir: PathBuf,
    pub settle: SettleDelays,
}

impl SyncOptions {
    pub fn assets_root(&self) -> PathBuf {
        self.assets_root
            .clone()
            .unwrap_or_else(|| self.out_root.join(DEFAULT_ASSETS_DIR))
    }

    /// Attachment folder as written into flat links
    pub fn rel_assets(&self) -> String {
        relative_assets(&self.out_root, &self.assets_root())
    }

    pub fn tag_filter(&self) -> TagFilter {
        TagFilter::new(&self.only_export_tags, &self.exclude_tags)
    }

    pub fn state(&self) -> SyncState {
        SyncState::new(&self.out_root)
    }
}

/// Result of a one-shot pass
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub imported: Option<ImportReport>,
    pub exported: Option<ExportReport>,
}

impl RunOutcome {
    /// 1 when an export was performed, 0 otherwise
    pub fn exit_code(&self) -> i32 {
        i32::from(self.exported.is_some())
    }
}

/// Import (unless skipped), then export if the store changed
pub fn run(options: &SyncOptions, sink: &dyn CommandSink, tags: &dyn FileTagReader) -> Result<RunOutcome> {
    let mut outcome = RunOutcome::default();

    if !options.skip_import {
        outcome.imported = Some(import(options, sink, tags)?);
    }
    if options.skip_export {
        return Ok(outcome);
    }

    if options.state().needs_export(&options.store_db) {
        let report = export(options)?;
        info!(
            "{} notes exported to {:?}",
            report.notes, options.out_root
        );
        outcome.exported = Some(report);
    } else {
        info!("No notes needed export");
    }
    Ok(outcome)
}


#[cfg(test)]
mod tests {
    use super::test_support::options_for;
    use super::*;
    use crate::store::fixture::StoreFixture;
    use crate::store::RecordingSink;
    use crate::timestamp::{from_unix_seconds, set_mtime};
    use tempfile::TempDir;

    #[test]
    fn test_default_assets_root() {
        let fixture = StoreFixture::new();
        let dir = TempDir::new().unwrap();
        let options = options_for(&fixture, dir.path(), ExportFormat::Flat);
        assert_eq!(options.assets_root(), dir.path().join("out/BearImages"));
        assert_eq!(options.rel_assets(), "BearImages");
    }

    #[test]
    fn test_run_exit_codes() {
        let fixture = StoreFixture::new();
        fixture.add_note("abc", "Plan", "Plan\nbody", 1_700_000_000.0);
        let dir = TempDir::new().unwrap();
        let options = options_for(&fixture, dir.path(), ExportFormat::Flat);
        let sink = RecordingSink::new();

        // First run: never synced, so export happens
        let first = run(&options, &sink, &NoFileTags).unwrap();
        assert_eq!(first.exit_code(), 1);
        assert!(dir.path().join("out/Plan.md").is_file());

        // Store file older than the export marker: nothing to do
        set_mtime(fixture.path(), from_unix_seconds(1_000.0)).unwrap();
        let second = run(&options, &sink, &NoFileTags).unwrap();
        assert_eq!(second.exit_code(), 0);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_skip_export_never_exports() {
        let fixture = StoreFixture::new();
        fixture.add_note("abc", "Plan", "Plan", 1_700_000_000.0);
        let dir = TempDir::new().unwrap();
        let mut options = options_for(&fixture, dir.path(), ExportFormat::Flat);
        options.skip_export = true;

        let outcome = run(&options, &RecordingSink::new(), &NoFileTags).unwrap();
        assert_eq!(outcome.exit_code(), 0);
        assert!(!dir.path().join("out/Plan.md").exists());
    }
}
