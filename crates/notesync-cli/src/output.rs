//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use std::path::Path;

use notesync_core::pipeline::{ExportReport, ImportReport, RunOutcome};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Print the result of a one-shot sync pass
    pub fn print_run_outcome(&self, out_root: &Path, outcome: &RunOutcome, dry_run: bool) {
        match self.format {
            OutputFormat::Human => {
                if dry_run {
                    println!("Dry run: no commands were sent to the store.");
                }
                match &outcome.imported {
                    Some(report) => println!("Import: {}", describe_import(report)),
                    None => println!("Import: skipped"),
                }
                match &outcome.exported {
                    Some(report) => println!("Export: {}", describe_export(report, out_root)),
                    None => println!("*** No notes needed exports"),
                }
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "out": out_root,
                        "dry_run": dry_run,
                        "imported": outcome.imported,
                        "exported": outcome.exported,
                        "exit_code": outcome.exit_code(),
                    })
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print daemon status
    pub fn print_status(&self, pid: Option<i32>, presence: &Path, log: &Path, tail: &[String]) {
        match self.format {
            OutputFormat::Human => match pid {
                Some(pid) => {
                    println!("Daemon: RUNNING  (pid={})", pid);
                    println!("PID file : {}", presence.display());
                    println!("Log file : {}", log.display());
                    println!();
                    println!("To trigger an immediate sync:  notesync daemon --trigger");
                    println!("To stop the daemon:            kill {}", pid);
                }
                None => {
                    println!("Daemon: NOT running");
                    if !tail.is_empty() {
                        println!();
                        println!("Last log entries:");
                        for line in tail {
                            println!("  {}", line);
                        }
                    }
                }
            },
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "running": pid.is_some(),
                        "pid": pid,
                        "presence_file": presence,
                        "log_file": log,
                        "recent_log": tail,
                    })
                );
            }
            OutputFormat::Quiet => {
                if let Some(pid) = pid {
                    println!("{}", pid);
                }
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn describe_import(report: &ImportReport) -> String {
    if report.files == 0 {
        return "no changed files".to_string();
    }
    format!(
        "{} changed file(s): {} updated, {} created, {} conflict(s), {} failed",
        report.files, report.updated, report.created, report.conflicts, report.failed
    )
}

fn describe_export(report: &ExportReport, out_root: &Path) -> String {
    format!(
        "{} notes exported to {} ({} rendered, {} unchanged, {} attachment(s) copied)",
        report.notes,
        out_root.display(),
        report.rendered,
        report.reused,
        report.attachments_copied
    )
}
