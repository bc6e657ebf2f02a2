//! Background sync daemon
//!
//! - **scheduler**: per-tick decisions
//! - **cycle**: strictly sequential import/export phases
//! - **watcher**: folder-write and store-change watchers
//! - **presence**: pid file, manual trigger, status
//!
//! One cooperative loop runs every cycle itself. Watchers and the signal
//! task only set flags; all sleeps are chunked to one second so shutdown
//! and manual triggers are picked up promptly.

pub mod cycle;
pub mod presence;
pub mod scheduler;
pub mod watcher;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::store::{SettleDelays, UrlSchemeDispatcher};

pub use cycle::{prepare_folders, run_pipeline_cycle, CycleKind, PhaseResult};
pub use crate::platform::{EditorProbe, FinderTags, FrontmostApp};
pub use presence::{tail_log, Presence, TAIL_LINES};
pub use scheduler::{Action, Decision, Observation, Policy, Scheduler, TickState};
pub use watcher::{DaemonWatchers, FolderWriteWatcher, StoreChangeWatcher};

const SLEEP_CHUNK: Duration = Duration::from_secs(1);

/// Flags raised by signal handlers and read by the loop
#[derive(Debug, Default)]
pub struct DaemonFlags {
    shutdown: AtomicBool,
    trigger: AtomicBool,
}

impl DaemonFlags {
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn request_trigger(&self) {
        self.trigger.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn trigger_pending(&self) -> bool {
        self.trigger.load(Ordering::SeqCst)
    }

    /// Read and clear the trigger flag
    pub fn take_trigger(&self) -> bool {
        self.trigger.swap(false, Ordering::SeqCst)
    }
}

/// Sleep up to `duration`, waking early on shutdown or a manual trigger
pub async fn interruptible_sleep(duration: Duration, flags: &DaemonFlags) {
    let deadline = Instant::now() + duration;
    while !flags.is_shutdown() && !flags.trigger_pending() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        tokio::time::sleep(remaining.min(SLEEP_CHUNK)).await;
    }
}

/// Run one full cycle and return
pub fn run_once(config: &Config) -> Vec<PhaseResult> {
    info!("--once mode: running one cycle.");
    let sink = UrlSchemeDispatcher::new(SettleDelays::default());
    let results = run_pipeline_cycle(CycleKind::Full, config, &sink, &FinderTags);
    info!("--once mode: done.");
    results
}

/// Run the daemon until a termination signal arrives
///
/// `config` was loaded from `config_path` and is re-read every tick.
pub async fn run(config_path: PathBuf, config: Config) -> Result<()> {
    let presence = Presence::new(config.presence_path());
    presence.claim().context("Failed to write presence file")?;

    let flags = Arc::new(DaemonFlags::default());
    let result = match install_signal_handlers(Arc::clone(&flags)) {
        Ok(()) => run_loop(&config_path, config, &flags).await,
        Err(e) => Err(e),
    };

    presence.release();
    info!("Daemon stopped.");
    result
}

#[cfg(unix)]
fn install_signal_handlers(flags: Arc<DaemonFlags>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut int = signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;
    let mut usr1 =
        signal(SignalKind::user_defined1()).context("Failed to register SIGUSR1 handler")?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = term.recv() => {
                    info!("Received SIGTERM; shutting down after current cycle.");
                    flags.request_shutdown();
                }
                _ = int.recv() => {
                    info!("Received SIGINT; shutting down after current cycle.");
                    flags.request_shutdown();
                }
                _ = usr1.recv() => {
                    info!("Received SIGUSR1; immediate sync cycle requested.");
                    flags.request_trigger();
                }
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn install_signal_handlers(flags: Arc<DaemonFlags>) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C; shutting down after current cycle.");
            flags.request_shutdown();
        }
    });
    Ok(())
}

async fn run_loop(config_path: &std::path::Path, mut config: Config, flags: &DaemonFlags) -> Result<()> {
    // Folders must exist before they can be watched
    prepare_folders(&config);
    let mut watchers = DaemonWatchers::arm(&config);

    info!(
        "Daemon started  pid={}  |  interval={}s  |  window={}-{}  |  fast-trigger={}  |  write-quiesce={:.0}s  |  watcher={}",
        std::process::id(),
        config.interval().as_secs(),
        config.sync_window.start().format("%H:%M"),
        config.sync_window.end().format("%H:%M"),
        if config.fast_trigger_on_db_change { "on" } else { "off" },
        config.quiet_period().as_secs_f64(),
        if watchers.folders_available() { "enabled" } else { "disabled" },
    );

    let sink = UrlSchemeDispatcher::new(SettleDelays::default());
    let editor = FrontmostApp;
    let mut scheduler = Scheduler::new(Instant::now(), config.sync_on_startup);
    let mut store_changed = false;

    while !flags.is_shutdown() {
        match Config::load_existing(config_path) {
            Ok(fresh) if fresh != config => {
                prepare_folders(&fresh);
                config = fresh;
                watchers.refresh(&config);
            }
            Ok(_) => {}
            Err(e) => warn!("Config reload failed ({}); keeping previous config.", e),
        }
        let policy = Policy::from(&config);

        store_changed |= watchers.store_changed();
        let seen = Observation {
            now: Instant::now(),
            local_time: Local::now().naive_local(),
            manual_trigger: flags.take_trigger(),
            last_write: watchers.last_write(),
            store_changed,
        };

        let decision = scheduler.tick(&policy, &seen, &editor);
        if decision.state.reached_store_check() {
            store_changed = false;
        }

        match decision.action {
            Action::Run(kind) => {
                match decision.state {
                    TickState::ManualTrigger => info!("Manual trigger: running immediate full sync cycle"),
                    TickState::FastTrigger => info!("Fast-trigger: store changed; running export cycle"),
                    _ => {}
                }
                tokio::task::block_in_place(|| {
                    run_pipeline_cycle(kind, &config, &sink, &FinderTags);
                });
            }
            Action::Sleep(duration) => {
                match decision.state {
                    TickState::Quiescing => info!(
                        "Folder write activity detected; pausing sync timer, retrying in {:.0}s",
                        duration.as_secs_f64()
                    ),
                    TickState::EditorActiveBackoff => info!(
                        "Interval elapsed but editor is active; retrying in {}s",
                        duration.as_secs()
                    ),
                    TickState::WindowClosed => {
                        debug!("Outside sync window; sleeping {:.0}s", duration.as_secs_f64())
                    }
                    _ => {}
                }
                interruptible_sleep(duration, flags).await;
            }
        }
    }
    Ok(())
}
