//! Daemon command handlers

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use notesync_core::daemon::{self, tail_log, PhaseResult, Presence, TAIL_LINES};
use notesync_core::{Config, ConfigError};

use crate::output::{Output, OutputFormat};

/// Load the daemon config, writing defaults on first use
///
/// Returns `None` after materializing a fresh file so the operator can
/// review it before anything runs.
fn load(config_path: &Path) -> Result<Option<Config>> {
    match Config::load_or_materialize(config_path) {
        Ok(config) => Ok(Some(config)),
        Err(e @ ConfigError::Materialized { .. }) => {
            eprintln!("{}", e);
            Ok(None)
        }
        Err(e) => Err(e).context("Failed to load configuration"),
    }
}

/// Run the daemon in the foreground until signalled
pub async fn start(config_path: PathBuf, _output: &Output) -> Result<i32> {
    let Some(config) = load(&config_path)? else {
        return Ok(1);
    };
    crate::logging::init_daemon(&config.log_path());

    let presence = Presence::new(config.presence_path());
    if let Some(pid) = presence.live_pid() {
        anyhow::bail!("Daemon already running (pid={})", pid);
    }

    daemon::run(config_path, config).await?;
    Ok(0)
}

/// Run one full cycle and exit
pub fn once(config_path: &Path, output: &Output) -> Result<i32> {
    let Some(config) = load(config_path)? else {
        return Ok(1);
    };
    crate::logging::init_daemon(&config.log_path());

    let results = daemon::run_once(&config);
    print_phases(&results, output);
    Ok(0)
}

/// Signal the running daemon to sync now
pub fn trigger(config_path: &Path, output: &Output) -> Result<i32> {
    let config = Config::load_existing(config_path).unwrap_or_default();
    let presence = Presence::new(config.presence_path());
    let pid = presence.trigger()?;
    output.success(&format!("Sent sync trigger to daemon (pid={})", pid));
    Ok(0)
}

/// Report whether a daemon is running; exit code 1 when it is not
pub fn status(config_path: &Path, output: &Output) -> Result<i32> {
    let config = Config::load_existing(config_path).unwrap_or_default();
    let presence = Presence::new(config.presence_path());
    let log = config.log_path();

    let pid = presence.live_pid();
    let tail = match pid {
        Some(_) => Vec::new(),
        None => tail_log(&log, TAIL_LINES).unwrap_or_default(),
    };
    output.print_status(pid, presence.path(), &log, &tail);
    Ok(if pid.is_some() { 0 } else { 1 })
}

fn print_phases(results: &[PhaseResult], output: &Output) {
    match output.format {
        OutputFormat::Human => {
            for result in results {
                println!(
                    "[{}] exit={} {:.1}s",
                    result.phase,
                    result.code,
                    result.elapsed.as_secs_f64()
                );
            }
        }
        OutputFormat::Json => {
            let phases: Vec<_> = results
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "phase": r.phase.to_string(),
                        "code": r.code,
                        "elapsed_secs": r.elapsed.as_secs_f64(),
                    })
                })
                .collect();
            println!("{}", serde_json::json!({ "phases": phases }));
        }
        OutputFormat::Quiet => {}
    }
}
