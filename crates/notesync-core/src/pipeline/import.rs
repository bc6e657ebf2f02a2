//! Import pass: files → store
//!
//! Every file edited since the last sync pass is backed up and pushed into
//! the store. Identified notes are checked for conflicts first; files
//! without an identifier are matched by title or become new notes.

use std::fs;
use std::path::Path;
use std::thread;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Captures;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::SyncOptions;
use crate::assets::{ImageImporter, VaultIndex};
use crate::conflict::{conflict_banner, insert_second_line, ConflictResolver};
use crate::convert::bundle::Bundle;
use crate::convert::links::{
    has_identifier_prefix, inline_reference_links, is_remote, restore_bundle_links,
    restore_repository_links, strip_identifier_prefix, MD_IMAGE_RE,
};
use crate::convert::tags::{append_tags, format_file_tag, tag_from_path};
use crate::convert::title_from_text;
use crate::detect::{changed_files, ChangedFile};
use crate::identity;
use crate::models::ExportFormat;
use crate::store::{decode_path, encode_path, CommandSink, NoteStore, NoteTarget, StoreCommand};
use crate::timestamp::{set_mtime, write_stamped};

/// OS-level tags attached to a file, added to notes created from it
pub trait FileTagReader {
    fn tags(&self, path: &Path) -> Vec<String>;
}

/// Reads no tags
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFileTags;

impl FileTagReader for NoFileTags {
    fn tags(&self, _path: &Path) -> Vec<String> {
        Vec::new()
    }
}

/// What one import pass did
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// Files found changed
    pub files: usize,
    /// Existing notes replaced
    pub updated: usize,
    /// Conflicting edits pushed into new notes
    pub conflicts: usize,
    /// Notes created from new files or bundles
    pub created: usize,
    pub failed: usize,
}

/// Run an import pass for one output root
///
/// Does nothing until the root has been exported to at least once.
pub fn import(options: &SyncOptions, sink: &dyn CommandSink, tags: &dyn FileTagReader) -> Result<ImportReport> {
    let state = options.state();
    let Some((last_sync, last_export)) = state.import_ready() else {
        debug!("{:?} has not been exported yet; skipping import", options.out_root);
        return Ok(ImportReport::default());
    };
    state
        .mark_sync(Utc::now())
        .context("Failed to update sync marker")?;

    let mut report = ImportReport::default();
    let changed = changed_files(&options.out_root, last_sync);
    if changed.is_empty() {
        return Ok(report);
    }

    let store = NoteStore::open(&options.store_db).context("Failed to open note store")?;
    let index = VaultIndex::build(&options.out_root);
    let importer = Importer {
        options,
        sink,
        tags,
        store: &store,
        resolver: ConflictResolver::new(&store, &options.backup_root),
        images: ImageImporter::new(&options.out_root, &index, sink),
        last_export,
    };

    // Let an editor finish writing the first changed file
    if !options.settle.before_import.is_zero() {
        thread::sleep(options.settle.before_import);
    }

    for file in &changed {
        report.files += 1;
        match importer.import_file(file) {
            Ok(outcome) => {
                info!("Imported {:?} ({:?})", file.path, outcome);
                match outcome {
                    Outcome::Updated => report.updated += 1,
                    Outcome::Conflict => report.conflicts += 1,
                    Outcome::Created => report.created += 1,
                }
            }
            Err(e) => {
                warn!("Failed to import {:?}: {:#}", file.path, e);
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Updated,
    Conflict,
    Created,
}

struct Importer<'a> {
    options: &'a SyncOptions,
    sink: &'a dyn CommandSink,
    tags: &'a dyn FileTagReader,
    store: &'a NoteStore,
    resolver: ConflictResolver<'a>,
    images: ImageImporter<'a>,
    last_export: DateTime<Utc>,
}

impl<'a> Importer<'a> {
    fn import_file(&self, file: &ChangedFile) -> Result<Outcome> {
        let raw = fs::read_to_string(&file.path).with_context(|| format!("Failed to read {:?}", file.path))?;
        let text = inline_reference_links(&raw);

        if let Err(e) = self.resolver.backup_file(file) {
            warn!("Could not back up {:?}: {}", file.path, e);
        }

        match &file.bundle {
            Some(bundle) => self.import_bundle(&text, file, bundle),
            None => Ok(self.import_flat(&text, file)),
        }
    }

    fn backup_store_note(&self, id: &str) {
        if let Err(e) = self.resolver.backup_store_note(id) {
            warn!("Could not back up note {}: {}", id, e);
        }
    }

    fn lookup_by_title(&self, title: &str) -> Option<String> {
        match self.store.lookup_id_by_title(title) {
            Ok(Some(id)) => {
                info!("Identifier recovered by title {:?}: {}", title, id);
                Some(id)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Title lookup failed for {:?}: {}", title, e);
                None
            }
        }
    }

    /// Tags for a new note: its folder, then any OS-level file tags
    fn with_path_tags(&self, text: &str, path: &Path) -> String {
        let relative = path.strip_prefix(&self.options.out_root).unwrap_or(path);
        let mut tags: Vec<String> = tag_from_path(relative).into_iter().collect();
        tags.extend(self.tags.tags(path).iter().map(|t| format_file_tag(t)));
        append_tags(text, &tags)
    }

    fn import_flat(&self, text: &str, file: &ChangedFile) -> Outcome {
        let text = match self.options.format {
            ExportFormat::Bundle => restore_bundle_links(text),
            ExportFormat::Flat => restore_repository_links(text, &self.options.rel_assets()),
        };
        let untagged = identity::strip(&text);

        if let Some(id) = untagged.id {
            let body = format!("{}\n", untagged.text.trim());
            // Must precede uploads: they move the note's modification time
            let conflict = self.resolver.is_conflict(&id, self.last_export);
            let target = NoteTarget::Id(id.clone());
            let body = self.images.import(&body, &file.path, Some(&target));

            if conflict {
                warn!("Sync conflict for {:?}; creating a separate note", file.path);
                self.backup_store_note(&id);
                let text = insert_second_line(&body, &conflict_banner(file.modified, &id));
                self.sink.dispatch(StoreCommand::Create { text });
                return Outcome::Conflict;
            }
            self.backup_store_note(&id);
            self.sink.dispatch(StoreCommand::ReplaceText { target, text: body });
            return Outcome::Updated;
        }

        let title = title_from_text(&untagged.text).unwrap_or_default();
        if let Some(id) = self.lookup_by_title(&title) {
            let target = NoteTarget::Id(id.clone());
            let body = self.images.import(&untagged.text, &file.path, Some(&target));
            self.backup_store_note(&id);
            self.sink.dispatch(StoreCommand::ReplaceText { target, text: body });
            return Outcome::Updated;
        }

        let tagged = self.with_path_tags(&untagged.text, &file.path);
        self.sink.dispatch(StoreCommand::Create {
            text: tagged.clone(),
        });
        if !self.options.settle.after_create.is_zero() {
            thread::sleep(self.options.settle.after_create);
        }

        let target = match self.lookup_by_title(&title) {
            Some(id) => NoteTarget::Id(id),
            None if !title.is_empty() => NoteTarget::Title(title),
            None => return Outcome::Created,
        };
        let linked = self.images.import(&tagged, &file.path, Some(&target));
        if linked != tagged {
            self.sink.dispatch(StoreCommand::ReplaceText {
                target,
                text: linked,
            });
        }
        Outcome::Created
    }

    /// Identifier of a bundle: side-file, marker, `info.json`, then title
    fn bundle_id(&self, bundle: &Bundle, text: &str) -> Option<String> {
        bundle
            .read_id_file()
            .or_else(|| identity::extract(text))
            .or_else(|| match bundle.read_info() {
                Ok(info) => info.and_then(|i| i.bear_uuid).filter(|id| !id.is_empty()),
                Err(e) => {
                    warn!("{}", e);
                    None
                }
            })
            .or_else(|| {
                let title = title_from_text(text).unwrap_or_default();
                self.lookup_by_title(&title)
            })
    }

    fn import_bundle(&self, text: &str, file: &ChangedFile, bundle: &Bundle) -> Result<Outcome> {
        let Some(id) = self.bundle_id(bundle, text) else {
            let tagged = self.with_path_tags(text, bundle.root());
            write_stamped(&file.path, tagged.as_bytes(), Some(file.modified))
                .with_context(|| format!("Failed to write {:?}", file.path))?;
            set_mtime(bundle.root(), file.modified)
                .with_context(|| format!("Failed to stamp {:?}", bundle.root()))?;
            self.sink.dispatch(StoreCommand::ImportBundle {
                path: bundle.root().to_path_buf(),
            });
            return Ok(Outcome::Created);
        };

        let clean = format!("{}\n", identity::strip_all(text).trim_end());
        let store_text = MD_IMAGE_RE
            .replace_all(&clean, |caps: &Captures| {
                if is_remote(&caps[2]) {
                    return caps[0].to_string();
                }
                let name = file_name_of(&caps[2]);
                format!("![{}]({})", &caps[1], encode_path(strip_identifier_prefix(&name)))
            })
            .into_owned();

        // Must precede uploads: they move the note's modification time
        if self.resolver.is_conflict(&id, self.last_export) {
            warn!("Sync conflict for {:?}; creating a separate note", bundle.root());
            self.backup_store_note(&id);
            let text = insert_second_line(&store_text, &conflict_banner(file.modified, &id));
            self.sink.dispatch(StoreCommand::Create { text });
            return Ok(Outcome::Conflict);
        }

        let bundle_text = MD_IMAGE_RE
            .replace_all(&clean, |caps: &Captures| {
                if is_remote(&caps[2]) {
                    return caps[0].to_string();
                }
                let name = file_name_of(&caps[2]);
                format!("![{}](assets/{})", &caps[1], encode_path(&name))
            })
            .into_owned();
        write_stamped(
            &file.path,
            identity::append(&bundle_text, &id).as_bytes(),
            Some(file.modified),
        )
        .with_context(|| format!("Failed to write {:?}", file.path))?;
        bundle.record_identity(&id)?;

        let target = NoteTarget::Id(id.clone());
        let assets = bundle.assets_dir();
        fs::create_dir_all(&assets).with_context(|| format!("Failed to create {:?}", assets))?;
        for caps in MD_IMAGE_RE.captures_iter(&clean) {
            if is_remote(&caps[2]) {
                continue;
            }
            let name = file_name_of(&caps[2]);
            let loose = bundle.root().join(&name);
            let asset = assets.join(&name);
            if loose.is_file() && !asset.exists() {
                if let Err(e) = fs::rename(&loose, &asset) {
                    warn!("Could not move {:?} into assets: {}", loose, e);
                }
            }
            if !has_identifier_prefix(&name) && asset.is_file() {
                self.images.upload(&target, &name, &asset);
            }
        }

        self.backup_store_note(&id);
        self.sink.dispatch(StoreCommand::ReplaceText {
            target,
            text: store_text,
        });
        Ok(Outcome::Updated)
    }
}

/// Decoded last segment of a link target
fn file_name_of(url: &str) -> String {
    let decoded = decode_path(url);
    decoded.rsplit('/').next().unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::export::export;
    use crate::pipeline::test_support::options_for;
    use crate::store::fixture::StoreFixture;
    use crate::store::RecordingSink;
    use crate::timestamp::to_unix_seconds;
    use chrono::TimeDelta;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const M: f64 = 1_700_000_000.0;

    /// Export, then move both markers a minute back so edits made now count
    fn export_rewound(options: &SyncOptions) {
        export(options).unwrap();
        options
            .state()
            .mark_export(Utc::now() - TimeDelta::seconds(60))
            .unwrap();
    }

    fn edit(path: &Path, content: &str) {
        fs::write(path, content).unwrap();
    }

    /// Records commands and moves the note's modification time on uploads
    struct TouchingSink<'a> {
        fixture: &'a StoreFixture,
        id: &'a str,
        commands: Mutex<Vec<StoreCommand>>,
    }

    impl CommandSink for TouchingSink<'_> {
        fn dispatch(&self, command: StoreCommand) {
            if matches!(command, StoreCommand::AddFile { .. }) {
                self.fixture
                    .touch_note(self.id, to_unix_seconds(Utc::now()) + 60.0);
            }
            self.commands.lock().unwrap().push(command);
        }
    }

    #[test]
    fn test_not_exported_root_is_skipped() {
        let fixture = StoreFixture::new();
        let dir = TempDir::new().unwrap();
        let options = options_for(&fixture, dir.path(), ExportFormat::Flat);
        let sink = RecordingSink::new();
        let report = import(&options, &sink, &NoFileTags).unwrap();
        assert_eq!(report, ImportReport::default());
        assert!(!options.state().sync_marker().exists());
    }

    #[test]
    fn test_edit_replaces_note_and_backs_up() {
        let fixture = StoreFixture::new();
        fixture.add_note("abc", "Plan", "Plan\nv1", M);
        let dir = TempDir::new().unwrap();
        let options = options_for(&fixture, dir.path(), ExportFormat::Flat);
        export_rewound(&options);

        let file = options.out_root.join("Plan.md");
        edit(&file, "Plan\n[//]: # ({BearID:abc})\nv2 edited\n");

        let sink = RecordingSink::new();
        let report = import(&options, &sink, &NoFileTags).unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(
            sink.commands(),
            vec![StoreCommand::ReplaceText {
                target: NoteTarget::Id("abc".to_string()),
                text: "Plan\nv2 edited\n".to_string(),
            }]
        );
        assert!(options.backup_root.join("Plan.md").is_file());
        let store_backups = fs::read_dir(&options.backup_root)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".txt"))
            .count();
        assert_eq!(store_backups, 1);

        // Nothing changed since: second pass imports nothing
        let report = import(&options, &RecordingSink::new(), &NoFileTags).unwrap();
        assert_eq!(report.files, 0);
    }

    #[test]
    fn test_conflict_creates_separate_note() {
        let fixture = StoreFixture::new();
        fixture.add_note("abc", "Plan", "Plan\nv1", M);
        let dir = TempDir::new().unwrap();
        let options = options_for(&fixture, dir.path(), ExportFormat::Flat);
        export_rewound(&options);

        // Store edited after the export
        fixture.touch_note("abc", to_unix_seconds(Utc::now()) + 30.0);
        edit(&options.out_root.join("Plan.md"), "Plan\n[//]: # ({BearID:abc})\nfile edit\n");

        let sink = RecordingSink::new();
        let report = import(&options, &sink, &NoFileTags).unwrap();
        assert_eq!(report.conflicts, 1);
        let commands = sink.commands();
        assert_eq!(commands.len(), 1);
        let StoreCommand::Create { text } = &commands[0] else {
            panic!("expected a new note, got {:?}", commands[0]);
        };
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Plan");
        assert!(lines[1].starts_with("::Sync conflict! External update: "));
        assert_eq!(
            lines[2],
            "[Click here to see original Bear note](bear://x-callback-url/open-note?id=abc)"
        );
        assert_eq!(lines[3], "file edit");
    }

    #[test]
    fn test_conflict_check_precedes_uploads() {
        let fixture = StoreFixture::new();
        fixture.add_note("abc", "Plan", "Plan\nv1", M);
        let dir = TempDir::new().unwrap();
        let options = options_for(&fixture, dir.path(), ExportFormat::Flat);
        export_rewound(&options);

        fs::write(options.out_root.join("new.png"), b"img").unwrap();
        edit(
            &options.out_root.join("Plan.md"),
            "Plan\n[//]: # ({BearID:abc})\n![](new.png)\n![](new.png)\n",
        );

        // Each upload moves the note past the export marker; the edit must
        // still be treated as a plain update
        let sink = TouchingSink {
            fixture: &fixture,
            id: "abc",
            commands: Mutex::new(Vec::new()),
        };
        let report = import(&options, &sink, &NoFileTags).unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.conflicts, 0);

        let commands = sink.commands.lock().unwrap();
        assert_eq!(commands.len(), 3);
        assert!(matches!(commands[0], StoreCommand::AddFile { .. }));
        assert!(matches!(commands[1], StoreCommand::AddFile { .. }));
        assert!(matches!(commands[2], StoreCommand::ReplaceText { .. }));
    }

    #[test]
    fn test_conflict_reported_despite_uploads() {
        let fixture = StoreFixture::new();
        fixture.add_note("abc", "Plan", "Plan\nv1", M);
        let dir = TempDir::new().unwrap();
        let options = options_for(&fixture, dir.path(), ExportFormat::Flat);
        export_rewound(&options);

        fixture.touch_note("abc", to_unix_seconds(Utc::now()) + 30.0);
        fs::write(options.out_root.join("new.png"), b"img").unwrap();
        edit(
            &options.out_root.join("Plan.md"),
            "Plan\n[//]: # ({BearID:abc})\n![](new.png)\n![](new.png)\n![](new.png)\n",
        );

        let sink = TouchingSink {
            fixture: &fixture,
            id: "abc",
            commands: Mutex::new(Vec::new()),
        };
        let report = import(&options, &sink, &NoFileTags).unwrap();
        assert_eq!(report.conflicts, 1);
        let commands = sink.commands.lock().unwrap();
        assert!(matches!(commands.last(), Some(StoreCommand::Create { .. })));
    }

    #[test]
    fn test_identifier_recovered_by_title() {
        let fixture = StoreFixture::new();
        fixture.add_note("abc", "Plan", "Plan\nv1", M);
        let dir = TempDir::new().unwrap();
        let options = options_for(&fixture, dir.path(), ExportFormat::Flat);
        export_rewound(&options);

        // An editor dropped the marker
        edit(&options.out_root.join("Plan.md"), "# Plan\nrewritten\n");

        let sink = RecordingSink::new();
        import(&options, &sink, &NoFileTags).unwrap();
        assert_eq!(
            sink.commands(),
            vec![StoreCommand::ReplaceText {
                target: NoteTarget::Id("abc".to_string()),
                text: "# Plan\nrewritten\n".to_string(),
            }]
        );
    }

    struct FixedTags;

    impl FileTagReader for FixedTags {
        fn tags(&self, _path: &Path) -> Vec<String> {
            vec!["to do".to_string()]
        }
    }

    #[test]
    fn test_new_file_creates_tagged_note() {
        let fixture = StoreFixture::new();
        let dir = TempDir::new().unwrap();
        let options = options_for(&fixture, dir.path(), ExportFormat::Flat);
        export_rewound(&options);

        fs::create_dir_all(options.out_root.join("_inbox")).unwrap();
        edit(&options.out_root.join("_inbox/Idea.md"), "Idea\nsomething new\n");

        let sink = RecordingSink::new();
        let report = import(&options, &sink, &FixedTags).unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(
            sink.commands(),
            vec![StoreCommand::Create {
                text: "Idea\nsomething new\n\n#.inbox #to do#\n".to_string()
            }]
        );
    }

    #[test]
    fn test_repository_links_restored_on_import() {
        let fixture = StoreFixture::new();
        fixture.add_note("abc", "Shot", "Shot", M);
        let dir = TempDir::new().unwrap();
        let options = options_for(&fixture, dir.path(), ExportFormat::Flat);
        export_rewound(&options);

        let att = "5A1B2C3D-4E5F-4A6B-8C7D-9E0F1A2B3C4D";
        edit(
            &options.out_root.join("Shot.md"),
            &format!("Shot\n[//]: # ({{BearID:abc}})\n![a](BearImages/{}/shot%20one.png)\n", att),
        );

        let sink = RecordingSink::new();
        import(&options, &sink, &NoFileTags).unwrap();
        assert_eq!(
            sink.commands(),
            vec![StoreCommand::ReplaceText {
                target: NoteTarget::Id("abc".to_string()),
                text: "Shot\n![a](shot%20one.png)\n".to_string(),
            }]
        );
    }

    #[test]
    fn test_bundle_import_updates_identity_and_uploads() {
        let fixture = StoreFixture::new();
        fixture.add_note("abc", "Doc", "Doc", M);
        let dir = TempDir::new().unwrap();
        let options = options_for(&fixture, dir.path(), ExportFormat::Bundle);
        export_rewound(&options);

        let att = "5A1B2C3D-4E5F-4A6B-8C7D-9E0F1A2B3C4D";
        let bundle = Bundle::new(options.out_root.join("Doc.textbundle"));
        fs::create_dir_all(bundle.assets_dir()).unwrap();
        fs::write(bundle.id_path(), "abc").unwrap();
        fs::write(bundle.root().join("new.png"), b"new").unwrap();
        fs::write(bundle.assets_dir().join(format!("{}_old.png", att)), b"old").unwrap();
        edit(
            &bundle.text_path(),
            &format!("Doc\n![](new.png)\n![](assets/{}_old.png)\n", att),
        );

        let sink = RecordingSink::new();
        let report = import(&options, &sink, &NoFileTags).unwrap();
        assert_eq!(report.updated, 1);

        let commands = sink.commands();
        assert_eq!(commands.len(), 2);
        assert!(matches!(
            &commands[0],
            StoreCommand::AddFile { filename, .. } if filename == "new.png"
        ));
        assert_eq!(
            commands[1],
            StoreCommand::ReplaceText {
                target: NoteTarget::Id("abc".to_string()),
                text: "Doc\n![](new.png)\n![](old.png)\n".to_string(),
            }
        );

        assert!(bundle.assets_dir().join("new.png").is_file());
        assert!(!bundle.root().join("new.png").exists());
        assert_eq!(
            bundle.read_text().unwrap(),
            format!(
                "Doc\n![](assets/new.png)\n![](assets/{}_old.png)\n\n[//]: # ({{BearID:abc}})\n",
                att
            )
        );
        assert_eq!(
            bundle.read_info().unwrap().unwrap().bear_uuid.as_deref(),
            Some("abc")
        );
    }

    #[test]
    fn test_new_bundle_is_handed_to_store() {
        let fixture = StoreFixture::new();
        let dir = TempDir::new().unwrap();
        let options = options_for(&fixture, dir.path(), ExportFormat::Bundle);
        export_rewound(&options);

        let bundle = Bundle::new(options.out_root.join("work/Fresh.textbundle"));
        fs::create_dir_all(bundle.root()).unwrap();
        edit(&bundle.text_path(), "Fresh\nfrom elsewhere");

        let sink = RecordingSink::new();
        let report = import(&options, &sink, &NoFileTags).unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(
            sink.commands(),
            vec![StoreCommand::ImportBundle {
                path: bundle.root().to_path_buf()
            }]
        );
        assert_eq!(bundle.read_text().unwrap(), "Fresh\nfrom elsewhere\n\n#work\n");
    }
}
