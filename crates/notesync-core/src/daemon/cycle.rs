//! Sync cycles
//!
//! A cycle is a fixed list of phases run one after another. Both formats
//! share one staging directory, so no two phases may ever overlap.

use std::fmt;
use std::fs;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::models::ExportFormat;
use crate::pipeline::{self, FileTagReader};
use crate::store::CommandSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    /// Import then export, for both formats
    Full,
    /// Export only, used when the store changed
    ExportOnly,
}

impl CycleKind {
    pub fn label(&self) -> &'static str {
        match self {
            CycleKind::Full => "full",
            CycleKind::ExportOnly => "export-only",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Import,
    Export,
}

/// One format in one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phase {
    pub format: ExportFormat,
    pub direction: Direction,
}

impl Phase {
    pub fn label(&self) -> String {
        let direction = match self.direction {
            Direction::Import => "import",
            Direction::Export => "export",
        };
        format!("{}-{}", self.format.label(), direction)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Phases of a cycle, in execution order
pub fn phases(kind: CycleKind) -> Vec<Phase> {
    let formats = [ExportFormat::Flat, ExportFormat::Bundle];
    let mut phases = Vec::new();
    if kind == CycleKind::Full {
        phases.extend(formats.iter().map(|&format| Phase {
            format,
            direction: Direction::Import,
        }));
    }
    phases.extend(formats.iter().map(|&format| Phase {
        format,
        direction: Direction::Export,
    }));
    phases
}

/// Executes a single phase
///
/// Returns the phase's exit code: 0 when nothing was exported, 1 when an
/// export was performed.
pub trait PhaseRunner {
    fn run_phase(&self, phase: Phase) -> Result<i32>;
}

/// How one phase ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseResult {
    pub phase: Phase,
    /// Exit code, or -1 when the phase failed
    pub code: i32,
    pub elapsed: Duration,
}

/// Run every phase of `kind` in order, logging each
///
/// A failed phase is logged and the cycle moves on to the next one.
pub fn run_cycle(kind: CycleKind, runner: &dyn PhaseRunner) -> Vec<PhaseResult> {
    let started = Instant::now();
    info!("── Sync cycle start [{}] ──", kind.label());

    let results = phases(kind)
        .into_iter()
        .map(|phase| {
            let t0 = Instant::now();
            let code = match runner.run_phase(phase) {
                Ok(code) => code,
                Err(e) => {
                    error!("[{}] failed: {:#}", phase, e);
                    -1
                }
            };
            let elapsed = t0.elapsed();
            info!("[{}] exit={}  {:.1}s", phase, code, elapsed.as_secs_f64());
            PhaseResult {
                phase,
                code,
                elapsed,
            }
        })
        .collect();

    info!(
        "── Sync cycle complete  total={:.1}s ──",
        started.elapsed().as_secs_f64()
    );
    results
}

/// Runs phases through the sync pipelines with the daemon's configuration
pub struct PipelineRunner<'a> {
    config: &'a Config,
    sink: &'a dyn CommandSink,
    tags: &'a dyn FileTagReader,
}

impl<'a> PipelineRunner<'a> {
    pub fn new(config: &'a Config, sink: &'a dyn CommandSink, tags: &'a dyn FileTagReader) -> Self {
        Self { config, sink, tags }
    }

    pub fn prepare_folders(&self) {
        prepare_folders(self.config);
    }
}

/// Create the output and backup folders of both formats
pub fn prepare_folders(config: &Config) {
    for dir in [
        &config.folder_md,
        &config.folder_tb,
        &config.backup_md,
        &config.backup_tb,
    ] {
        if let Err(e) = fs::create_dir_all(dir) {
            warn!("Could not create {:?}: {}", dir, e);
        }
    }
}

impl PhaseRunner for PipelineRunner<'_> {
    fn run_phase(&self, phase: Phase) -> Result<i32> {
        let mut options = self.config.sync_options(phase.format);
        options.skip_import = phase.direction == Direction::Export;
        options.skip_export = phase.direction == Direction::Import;
        let outcome = pipeline::run(&options, self.sink, self.tags)
            .with_context(|| format!("{} pass over {:?}", phase, options.out_root))?;
        Ok(outcome.exit_code())
    }
}

/// Prepare folders and run one cycle through the pipelines
pub fn run_pipeline_cycle(
    kind: CycleKind,
    config: &Config,
    sink: &dyn CommandSink,
    tags: &dyn FileTagReader,
) -> Vec<PhaseResult> {
    let runner = PipelineRunner::new(config, sink, tags);
    runner.prepare_folders();
    run_cycle(kind, &runner)
}
