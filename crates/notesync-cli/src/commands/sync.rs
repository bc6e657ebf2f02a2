//! Sync command handler

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use notesync_core::daemon::FinderTags;
use notesync_core::pipeline::{self, SyncOptions};
use notesync_core::{CommandSink, Config, RecordingSink, SettleDelays, UrlSchemeDispatcher};

use crate::output::Output;
use crate::SyncArgs;

/// Run one pass and return the process exit code
///
/// The code is 1 when notes were exported and 0 otherwise, so wrapper
/// scripts can tell whether the export folder changed.
pub fn run(config_path: &Path, args: &SyncArgs, output: &Output) -> Result<i32> {
    crate::logging::init_console(output.is_quiet());

    let config = base_config(config_path)?;
    let options = build_options(&config, args);
    info!(
        "{} sync: out={:?} backup={:?}",
        options.format.label(),
        options.out_root,
        options.backup_root
    );

    let outcome = if args.dry_run {
        let sink = RecordingSink::new();
        let outcome = run_with(&options, &sink)?;
        for command in sink.commands() {
            output.message(&format!("would {}", command.describe()));
        }
        outcome
    } else {
        let sink = UrlSchemeDispatcher::new(options.settle);
        run_with(&options, &sink)?
    };

    output.print_run_outcome(&options.out_root, &outcome, args.dry_run);
    Ok(outcome.exit_code())
}

fn run_with(options: &SyncOptions, sink: &dyn CommandSink) -> Result<pipeline::RunOutcome> {
    pipeline::run(options, sink, &FinderTags).context("Sync failed")
}

/// The config file when present, built-in defaults otherwise
fn base_config(config_path: &Path) -> Result<Config> {
    if config_path.exists() {
        Config::load_existing(config_path).context("Failed to load configuration")
    } else {
        Ok(Config::default())
    }
}

/// Apply command-line overrides on top of the configured options
fn build_options(config: &Config, args: &SyncArgs) -> SyncOptions {
    let mut options = config.sync_options(args.format);

    if let Some(out) = &args.out {
        options.out_root = out.clone();
    }
    if let Some(backup) = &args.backup {
        options.backup_root = backup.clone();
    }
    if let Some(images) = &args.images {
        options.assets_root = Some(images.clone());
    }
    if let Some(db) = &args.db {
        options.store_db = db.clone();
    }
    if let Some(store_images) = &args.store_images {
        options.store_images = store_images.clone();
    }
    if let Some(staging) = &args.staging {
        options.staging_dir = staging.clone();
    }

    options.skip_import = args.skip_import;
    options.skip_export = args.skip_export;
    options.hide_tags |= args.hide_tags;
    options.tag_folders |= args.tag_folders;
    if !args.exclude_tags.is_empty() {
        options.exclude_tags = args.exclude_tags.clone();
    }
    if !args.only_tags.is_empty() {
        options.only_export_tags = args.only_tags.clone();
    }
    if args.dry_run {
        options.settle = SettleDelays::none();
    }
    options
}
