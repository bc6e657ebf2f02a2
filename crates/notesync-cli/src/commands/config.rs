//! Config command handlers

use std::path::Path;

use anyhow::{Context, Result};

use notesync_core::Config;

use crate::output::{Output, OutputFormat};

/// Show the effective configuration
///
/// A missing file shows the built-in defaults without writing anything.
pub fn show(config_path: &Path, output: &Output) -> Result<()> {
    let exists = config_path.exists();
    let config = if exists {
        Config::load_existing(config_path).context("Failed to load configuration")?
    } else {
        Config::default()
    };

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "config_file": config_path,
                    "exists": exists,
                    "config": config,
                    "log_file": config.log_path(),
                    "presence_file": config.presence_path(),
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config_path.display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  store_db:          {}", config.store_db.display());
            println!("  store_images:      {}", config.store_images.display());
            println!("  staging_dir:       {}", config.staging_dir.display());
            println!("  folder_md:         {}", config.folder_md.display());
            println!("  backup_md:         {}", config.backup_md.display());
            println!("  folder_tb:         {}", config.folder_tb.display());
            println!("  backup_tb:         {}", config.backup_tb.display());
            println!("  interval:          {}s", config.interval().as_secs());
            println!("  write_quiet:       {}s", config.write_quiet_seconds);
            println!("  sync_on_startup:   {}", config.sync_on_startup);
            println!("  fast_trigger:      {}", config.fast_trigger_on_db_change);
            println!(
                "  sync_window:       {}-{}",
                config.sync_window.start().format("%H:%M"),
                config.sync_window.end().format("%H:%M")
            );
            println!("  tag_folders:       {}", config.tag_folders);
            println!("  hide_tags:         {}", config.hide_tags);
            println!("  exclude_tags:      {}", join_or_none(&config.exclude_tags));
            println!("  only_export_tags:  {}", join_or_none(&config.only_export_tags));
            println!("  log_file:          {}", config.log_path().display());
            println!();
            if exists {
                println!("Config file: {}", config_path.display());
            } else {
                println!("Config file: {} (not created yet)", config_path.display());
            }
        }
    }

    Ok(())
}

/// Print the config file path
pub fn path(config_path: &Path, output: &Output) -> Result<()> {
    match output.format {
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "config_file": config_path }));
        }
        _ => println!("{}", config_path.display()),
    }
    Ok(())
}

fn join_or_none(values: &[String]) -> String {
    if values.is_empty() {
        "(none)".to_string()
    } else {
        values.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_or_none() {
        assert_eq!(join_or_none(&[]), "(none)");
        assert_eq!(
            join_or_none(&["work".to_string(), "to do".to_string()]),
            "work, to do"
        );
    }
}
