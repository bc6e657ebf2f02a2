//! Logging setup
//!
//! Level comes from NOTESYNC_LOG (default `info`). Console output goes to
//! stderr so `--json` output on stdout stays parseable. The daemon also
//! appends to its log file.

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_ENV: &str = "NOTESYNC_LOG";

fn env_filter(default_level: &str) -> EnvFilter {
    let level = std::env::var(LOG_ENV).unwrap_or_else(|_| default_level.to_string());
    EnvFilter::new(format!("notesync_core={},notesync_cli={}", level, level))
}

/// Console-only logging for one-shot commands
pub fn init_console(quiet: bool) {
    let default_level = if quiet { "warn" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Console plus log-file logging for daemon runs
///
/// Falls back to console-only when the log file cannot be opened.
pub fn init_daemon(log_path: &Path) {
    let Some(file) = open_log(log_path) else {
        init_console(false);
        return;
    };

    let console = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let logfile = fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_writer(Mutex::new(file));

    let _ = tracing_subscriber::registry()
        .with(env_filter("info"))
        .with(console)
        .with(logfile)
        .try_init();

    info!("Logging to {:?}", log_path);
}

fn open_log(log_path: &Path) -> Option<File> {
    if let Some(parent) = log_path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            eprintln!("Warning: Could not create log directory {:?}: {}", parent, e);
            return None;
        }
    }
    match OpenOptions::new().create(true).append(true).open(log_path) {
        Ok(f) => Some(f),
        Err(e) => {
            eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
            None
        }
    }
}
