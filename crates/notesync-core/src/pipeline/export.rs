//! Export pass: store → files
//!
//! Every active note is placed into the staging area, either by carrying its
//! still-current published copy over or by rendering it fresh. The staging
//! area then gets both marker files and is mirrored onto the output root.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use super::staging::{copy_file, copy_tree, PublishStats, Staging};
use super::SyncOptions;
use crate::assets::{has_images, AssetReconciler};
use crate::convert::bundle::Bundle;
use crate::convert::{clean_title, destinations, render_body, TagFilter};
use crate::platform;
use crate::detect::{bundle_path, flat_path, reusable_copy, Reusable};
use crate::error::{SyncError, SyncResult};
use crate::models::{ExportFormat, NoteRecord};
use crate::state::SyncState;
use crate::store::NoteStore;
use crate::timestamp::write_stamped;

/// What one export pass did
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    /// Destination files (a note with tag folders counts once per copy)
    pub notes: usize,
    /// Destinations rendered from the store
    pub rendered: usize,
    /// Destinations carried over from the previous publish
    pub reused: usize,
    pub attachments_copied: usize,
    /// Rendered destinations with no published copy yet
    pub created: usize,
    pub published: PublishStats,
}

/// Run a full export pass for one output root
pub fn export(options: &SyncOptions) -> Result<ExportReport> {
    let staging = Staging::new(&options.staging_dir);
    staging.reset().context("Failed to prepare staging area")?;

    let mut report = ExportReport::default();
    {
        let store = NoteStore::open_snapshot(&options.store_db, staging.path())
            .context("Failed to open note store")?;
        let mut exporter = Exporter::new(options, staging.path());
        let notes = store.active_notes().context("Failed to read notes")?;
        for note in &notes {
            exporter.export_note(&store, note, &mut report);
        }
        report.attachments_copied = exporter.reconciler.copied();
    }

    SyncState::new(staging.path())
        .mark_export(Utc::now())
        .context("Failed to write export markers")?;
    report.published = staging
        .publish(&options.out_root)
        .with_context(|| format!("Failed to publish to {:?}", options.out_root))?;
    debug!(
        "Export: {} rendered, {} reused, {} attachments copied",
        report.rendered, report.reused, report.attachments_copied
    );
    Ok(report)
}

struct Exporter<'a> {
    options: &'a SyncOptions,
    staging: &'a Path,
    filter: TagFilter,
    reconciler: AssetReconciler,
    rel_assets: String,
}

impl<'a> Exporter<'a> {
    fn new(options: &'a SyncOptions, staging: &'a Path) -> Self {
        Self {
            options,
            staging,
            filter: options.tag_filter(),
            reconciler: AssetReconciler::new(&options.store_images),
            rel_assets: options.rel_assets(),
        }
    }

    fn export_note(&mut self, store: &NoteStore, note: &NoteRecord, report: &mut ExportReport) {
        let filename = clean_title(&note.title);
        let bases = destinations(
            self.staging,
            &filename,
            &note.body,
            &self.filter,
            self.options.tag_folders,
        );
        if bases.is_empty() {
            debug!("Skipping excluded note {:?}", filename);
            return;
        }

        let text = render_body(note.body.trim_end(), &note.id, self.options.hide_tags);
        for base in &bases {
            report.notes += 1;
            if let Some(parent) = base.parent() {
                if let Err(e) = fs::create_dir_all(parent) {
                    warn!("Could not create {:?}: {}", parent, e);
                    continue;
                }
            }
            let published = self.options.out_root.join(base.strip_prefix(self.staging).unwrap_or(base));

            if let Some(copy) = reusable_copy(&published, self.options.format, note.modified) {
                if self.carry_over(&copy, base) {
                    report.reused += 1;
                    continue;
                }
            }

            match self.render(store, note, &text, base, &published) {
                Ok(is_new) => {
                    report.rendered += 1;
                    report.created += usize::from(is_new);
                }
                Err(e) => warn!("Failed to export {:?}: {}", filename, e),
            }
        }
    }

    /// Copy a current published copy into staging; false means render instead
    fn carry_over(&self, copy: &Reusable, base: &Path) -> bool {
        match copy {
            Reusable::File(path) => match copy_file(path, &flat_path(base)) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Could not reuse {:?}: {}", path, e);
                    false
                }
            },
            Reusable::Bundle(path) => {
                let dest = bundle_path(base);
                match copy_tree(path, &dest) {
                    Ok(()) => true,
                    Err(e) => {
                        debug!("Rebuilding {:?} after failed copy: {}", dest, e);
                        if dest.is_dir() {
                            if let Err(e) = fs::remove_dir_all(&dest) {
                                warn!("Could not remove partial copy {:?}: {}", dest, e);
                            }
                        }
                        false
                    }
                }
            }
        }
    }

    /// Attachment table for a note; a failed query leaves links unresolved
    fn attachments(&self, store: &NoteStore, note: &NoteRecord) -> HashMap<String, String> {
        store.attachment_map(note.pk).unwrap_or_else(|e| {
            warn!("Attachment lookup failed for {:?}: {}", note.title, e);
            HashMap::new()
        })
    }

    /// Render into staging; returns whether nothing was published there before
    ///
    /// Newness is judged at the published location: staging is emptied
    /// on every pass.
    fn render(
        &mut self,
        store: &NoteStore,
        note: &NoteRecord,
        text: &str,
        base: &Path,
        published: &Path,
    ) -> SyncResult<bool> {
        match self.options.format {
            ExportFormat::Bundle if has_images(text) || bundle_path(published).is_dir() => {
                let is_new = !bundle_path(published).exists();
                let attachments = self.attachments(store, note);
                let bundle = Bundle::new(bundle_path(base));
                let linked = self
                    .reconciler
                    .link_into_bundle(text, &attachments, &bundle.assets_dir());
                bundle.write(&linked, &note.id, note.modified)?;
                Ok(is_new)
            }
            ExportFormat::Bundle => {
                let is_new = !flat_path(published).exists();
                write_note_file(&flat_path(base), text, note, is_new)
            }
            ExportFormat::Flat => {
                let linked = if has_images(text) {
                    let attachments = self.attachments(store, note);
                    self.reconciler.link_to_repository(
                        text,
                        &attachments,
                        &self.options.assets_root(),
                        &self.rel_assets,
                    )
                } else {
                    text.to_string()
                };
                let is_new = !flat_path(published).exists();
                write_note_file(&flat_path(base), &linked, note, is_new)
            }
        }
    }
}

/// Write a flat note with the note's timestamps
///
/// The creation date is only set on files that are new to the output root.
fn write_note_file(path: &Path, text: &str, note: &NoteRecord, is_new: bool) -> SyncResult<bool> {
    write_stamped(path, text.as_bytes(), Some(note.modified)).map_err(|e| SyncError::from_io(e, path))?;
    if is_new {
        platform::set_creation_date(path, note.created);
    }
    Ok(is_new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::options_for;
    use crate::store::fixture::StoreFixture;
    use crate::timestamp::{from_unix_seconds, mtime, set_mtime};
    use std::path::PathBuf;
    use tempfile::TempDir;

    const M: f64 = 1_700_000_000.0;
    const ATT: &str = "5A1B2C3D-4E5F-4A6B-8C7D-9E0F1A2B3C4D";

    fn files_under(root: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().strip_prefix(root).unwrap().to_path_buf())
            .collect();
        files.sort();
        files
    }

    #[test]
    fn test_tag_folders_with_exclusion() {
        let fixture = StoreFixture::new();
        fixture.add_note("abc", "Plan", "Plan\n#work content", M);
        fixture.add_note("def", "Diary", "Diary\n#personal/2024 secrets", M);
        let dir = TempDir::new().unwrap();
        let mut options = options_for(&fixture, dir.path(), ExportFormat::Flat);
        options.tag_folders = true;
        options.exclude_tags = vec!["#personal".to_string()];

        let report = export(&options).unwrap();
        assert_eq!(report.notes, 2);
        assert_eq!(report.rendered, 2);

        let out = &options.out_root;
        assert_eq!(
            files_under(out),
            vec![
                PathBuf::from(".export-time.log"),
                PathBuf::from(".sync-time.log"),
                PathBuf::from("Plan.md"),
                PathBuf::from("work/Plan.md"),
            ]
        );
        assert_eq!(
            fs::read_to_string(out.join("work/Plan.md")).unwrap(),
            "Plan\n[//]: # ({BearID:abc})\n#work content"
        );
        assert_eq!(mtime(&out.join("Plan.md")), Some(from_unix_seconds(M)));

        // Unchanged store: everything is carried over, nothing rendered
        let again = export(&options).unwrap();
        assert_eq!(again.rendered, 0);
        assert_eq!(again.reused, 2);
        // Only the two marker files changed
        assert_eq!(again.published.copied, 2);
        assert_eq!(again.published.removed, 0);
    }

    #[test]
    fn test_idempotent_flat_export_with_attachment() {
        let fixture = StoreFixture::new();
        let pk = fixture.add_note("abc", "Shot", "Shot\n![](shot.png)", M);
        fixture.add_attachment(pk, "shot.png", ATT);
        let dir = TempDir::new().unwrap();
        let options = options_for(&fixture, dir.path(), ExportFormat::Flat);
        let source = options.store_images.join(ATT).join("shot.png");
        fs::create_dir_all(source.parent().unwrap()).unwrap();
        fs::write(&source, b"png").unwrap();
        set_mtime(&source, from_unix_seconds(M)).unwrap();

        let first = export(&options).unwrap();
        assert_eq!(first.attachments_copied, 1);
        let published = options.out_root.join("Shot.md");
        let bytes = fs::read(&published).unwrap();
        assert_eq!(
            String::from_utf8_lossy(&bytes),
            format!("Shot\n[//]: # ({{BearID:abc}})\n![](BearImages/{}/shot.png)", ATT)
        );
        assert!(options.out_root.join("BearImages").join(ATT).join("shot.png").is_file());

        let second = export(&options).unwrap();
        assert_eq!(second.attachments_copied, 0);
        assert_eq!(second.rendered, 0);
        assert_eq!(fs::read(&published).unwrap(), bytes);
        assert_eq!(mtime(&published), Some(from_unix_seconds(M)));
    }

    #[test]
    fn test_modified_note_is_rendered_again() {
        let fixture = StoreFixture::new();
        fixture.add_note("abc", "Plan", "Plan\nv1", M);
        let dir = TempDir::new().unwrap();
        let options = options_for(&fixture, dir.path(), ExportFormat::Flat);
        let first = export(&options).unwrap();
        assert_eq!(first.created, 1);

        fixture.set_body("abc", "Plan\nv2");
        fixture.touch_note("abc", M + 1.0);
        let report = export(&options).unwrap();
        assert_eq!(report.rendered, 1);
        // Already published, so not treated as a new file
        assert_eq!(report.created, 0);
        assert!(fs::read_to_string(options.out_root.join("Plan.md"))
            .unwrap()
            .ends_with("v2"));
    }

    #[test]
    fn test_deleted_note_disappears_from_output() {
        let fixture = StoreFixture::new();
        let pk = fixture.add_note("abc", "Plan", "Plan", M);
        let dir = TempDir::new().unwrap();
        let options = options_for(&fixture, dir.path(), ExportFormat::Flat);
        export(&options).unwrap();
        assert!(options.out_root.join("Plan.md").exists());

        fixture.set_flags(pk, true, false);
        let report = export(&options).unwrap();
        assert_eq!(report.published.removed, 1);
        assert!(!options.out_root.join("Plan.md").exists());
    }

    #[test]
    fn test_bundle_export_and_hybrid() {
        let fixture = StoreFixture::new();
        let pk = fixture.add_note("abc", "Shot", "Shot\n![](shot.png)", M);
        fixture.add_attachment(pk, "shot.png", ATT);
        fixture.add_note("def", "Plain", "Plain\nno images", M);
        let dir = TempDir::new().unwrap();
        let options = options_for(&fixture, dir.path(), ExportFormat::Bundle);
        let source = options.store_images.join(ATT).join("shot.png");
        fs::create_dir_all(source.parent().unwrap()).unwrap();
        fs::write(&source, b"png").unwrap();

        export(&options).unwrap();
        let out = &options.out_root;
        let bundle = Bundle::new(out.join("Shot.textbundle"));
        assert_eq!(
            bundle.read_text().unwrap(),
            format!("Shot\n[//]: # ({{BearID:abc}})\n![](assets/{}_shot.png)", ATT)
        );
        assert_eq!(bundle.read_id_file().as_deref(), Some("abc"));
        assert!(bundle.assets_dir().join(format!("{}_shot.png", ATT)).is_file());
        assert_eq!(mtime(bundle.root()), Some(from_unix_seconds(M)));
        // No images: written flat
        assert!(out.join("Plain.md").is_file());
        assert!(!out.join("Plain.textbundle").exists());

        let again = export(&options).unwrap();
        assert_eq!(again.rendered, 0);
        assert_eq!(again.reused, 2);
        assert_eq!(mtime(bundle.root()), Some(from_unix_seconds(M)));
    }

    #[test]
    fn test_hidden_tags_are_removed_from_output() {
        let fixture = StoreFixture::new();
        fixture.add_note("abc", "Plan", "Plan\n#work #home\nbody", M);
        let dir = TempDir::new().unwrap();
        let mut options = options_for(&fixture, dir.path(), ExportFormat::Flat);
        options.hide_tags = true;

        export(&options).unwrap();
        assert_eq!(
            fs::read_to_string(options.out_root.join("Plan.md")).unwrap(),
            "Plan\n[//]: # ({BearID:abc})\n\nbody"
        );
    }
}
