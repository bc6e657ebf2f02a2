//! notesync CLI
//!
//! Command-line interface for notesync - one-shot sync passes and the
//! background daemon.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use notesync_core::ExportFormat;

mod commands;
mod logging;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "notesync")]
#[command(about = "notesync - Keep a note store and a folder of markdown files in step")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file (defaults to $NOTESYNC_CONFIG or the user config dir)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one import/export pass for a single format
    Sync(SyncArgs),
    /// Run the background sync daemon
    Daemon {
        /// Run one full cycle and exit
        #[arg(long, conflicts_with_all = ["trigger", "status"])]
        once: bool,
        /// Ask the running daemon to sync now
        #[arg(long, conflicts_with = "status")]
        trigger: bool,
        /// Report whether a daemon is running
        #[arg(long)]
        status: bool,
    },
    /// Show configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct SyncArgs {
    /// Export root (defaults to the configured folder for the format)
    #[arg(long, value_name = "DIR")]
    pub out: Option<PathBuf>,

    /// Backup root for replaced and conflicting notes
    #[arg(long, value_name = "DIR")]
    pub backup: Option<PathBuf>,

    /// Attachment folder for md exports (defaults to <out>/BearImages)
    #[arg(long, value_name = "DIR")]
    pub images: Option<PathBuf>,

    /// Export format: md or tb
    #[arg(long, default_value = "md")]
    pub format: ExportFormat,

    /// Do not import changed files
    #[arg(long)]
    pub skip_import: bool,

    /// Do not export notes
    #[arg(long)]
    pub skip_export: bool,

    /// Leave out notes carrying this tag (repeatable)
    #[arg(long = "exclude-tag", value_name = "TAG")]
    pub exclude_tags: Vec<String>,

    /// Export only notes carrying this tag (repeatable)
    #[arg(long = "only-tag", value_name = "TAG")]
    pub only_tags: Vec<String>,

    /// Hide tags in exported files
    #[arg(long)]
    pub hide_tags: bool,

    /// Also place notes in folders named after their tags
    #[arg(long)]
    pub tag_folders: bool,

    /// Note store database
    #[arg(long, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Store attachment folder
    #[arg(long, value_name = "DIR")]
    pub store_images: Option<PathBuf>,

    /// Staging area
    #[arg(long, value_name = "DIR")]
    pub staging: Option<PathBuf>,

    /// Record store commands instead of sending them
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = notesync_core::Config::path_with_cli_override(cli.config.as_ref());

    match cli.command {
        Commands::Sync(args) => {
            let code = commands::sync::run(&config_path, &args, &output)?;
            std::process::exit(code);
        }
        Commands::Daemon {
            once,
            trigger,
            status,
        } => {
            let code = if status {
                commands::daemon::status(&config_path, &output)?
            } else if trigger {
                commands::daemon::trigger(&config_path, &output)?
            } else if once {
                commands::daemon::once(&config_path, &output)?
            } else {
                commands::daemon::start(config_path, &output).await?
            };
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Commands::Config { command } => match command.unwrap_or(ConfigCommands::Show) {
            ConfigCommands::Show => commands::config::show(&config_path, &output),
            ConfigCommands::Path => commands::config::path(&config_path, &output),
        },
    }
}
