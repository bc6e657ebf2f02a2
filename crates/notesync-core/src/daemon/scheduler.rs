//! Tick state machine
//!
//! Each tick looks at the watchers, the clock and the trigger flag and
//! decides whether to run a cycle or how long to sleep. Guards in order:
//!
//! 1. manual trigger: full cycle, bypassing every other guard
//! 2. outside the time-of-day window: sleep until it opens
//! 3. recent folder writes: sleep out the rest of the quiet period
//! 4. store changed: export-only cycle, unless an editor has focus
//! 5. interval elapsed: full cycle, or a short backoff while an editor has focus
//! 6. otherwise idle

use std::time::{Duration, Instant};

use chrono::{NaiveDateTime, NaiveTime, TimeDelta};

use super::cycle::CycleKind;
use crate::platform::EditorProbe;
use crate::config::{Config, SyncWindow};

/// Backoff while an editor has focus at interval time
pub const EDITOR_BACKOFF: Duration = Duration::from_secs(15);

/// Bounds for a single sleep while the window is closed
const WINDOW_SLEEP_MIN: Duration = Duration::from_secs(10);
const WINDOW_SLEEP_MAX: Duration = Duration::from_secs(600);

const IDLE_SLICE: Duration = Duration::from_secs(1);

/// Why a tick decided what it did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickState {
    WindowClosed,
    Quiescing,
    ManualTrigger,
    FastTrigger,
    IntervalSync,
    EditorActiveBackoff,
    Idle,
}

impl TickState {
    /// Whether the tick got as far as the store-change check
    ///
    /// A store change seen while the window is closed or the folders are
    /// busy stays pending for a later tick.
    pub fn reached_store_check(&self) -> bool {
        !matches!(
            self,
            TickState::WindowClosed | TickState::Quiescing | TickState::ManualTrigger
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Run(CycleKind),
    Sleep(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub state: TickState,
    pub action: Action,
}

impl Decision {
    fn run(state: TickState, kind: CycleKind) -> Self {
        Self {
            state,
            action: Action::Run(kind),
        }
    }

    fn sleep(state: TickState, duration: Duration) -> Self {
        Self {
            state,
            action: Action::Sleep(duration),
        }
    }
}

/// Settings the scheduler reads, refreshed from the config every tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Policy {
    pub interval: Duration,
    pub quiet_period: Duration,
    pub window: SyncWindow,
    pub fast_trigger: bool,
}

impl From<&Config> for Policy {
    fn from(config: &Config) -> Self {
        Self {
            interval: config.interval(),
            quiet_period: config.quiet_period(),
            window: config.sync_window,
            fast_trigger: config.fast_trigger_on_db_change,
        }
    }
}

/// What the loop observed this tick
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    pub now: Instant,
    pub local_time: NaiveDateTime,
    pub manual_trigger: bool,
    pub last_write: Option<Instant>,
    pub store_changed: bool,
}

/// Tick state carried between ticks
#[derive(Debug, Clone)]
pub struct Scheduler {
    /// `None` until the first cycle; an unset value counts as overdue
    last_cycle: Option<Instant>,
}

impl Scheduler {
    /// A scheduler whose first interval cycle is due at once (`sync_on_startup`)
    /// or one interval after `now`
    pub fn new(now: Instant, sync_on_startup: bool) -> Self {
        Self {
            last_cycle: (!sync_on_startup).then_some(now),
        }
    }

    /// Decide this tick
    ///
    /// A `Run` decision counts as a completed cycle for interval purposes.
    /// The editor probe is only consulted when a cycle would otherwise start.
    pub fn tick(&mut self, policy: &Policy, seen: &Observation, editor: &dyn EditorProbe) -> Decision {
        if seen.manual_trigger {
            return self.start(seen.now, TickState::ManualTrigger, CycleKind::Full);
        }

        if !policy.window.contains(seen.local_time.time()) {
            // The interval restarts once the window opens
            self.last_cycle = Some(seen.now);
            let wait = until_window_opens(policy.window.start(), seen.local_time);
            return Decision::sleep(TickState::WindowClosed, wait);
        }

        if let Some(last_write) = seen.last_write {
            let age = seen.now.saturating_duration_since(last_write);
            if age < policy.quiet_period {
                let remaining = (policy.quiet_period - age).max(Duration::from_secs(1));
                return Decision::sleep(TickState::Quiescing, remaining);
            }
        }

        // An editor with focus defers a fast trigger to the interval check
        if policy.fast_trigger && seen.store_changed && !editor.editor_active() {
            return self.start(seen.now, TickState::FastTrigger, CycleKind::ExportOnly);
        }

        let elapsed = self
            .last_cycle
            .map(|last| seen.now.saturating_duration_since(last));
        if let Some(elapsed) = elapsed.filter(|e| *e < policy.interval) {
            return Decision::sleep(TickState::Idle, (policy.interval - elapsed).min(IDLE_SLICE));
        }

        if editor.editor_active() {
            return Decision::sleep(TickState::EditorActiveBackoff, EDITOR_BACKOFF);
        }
        self.start(seen.now, TickState::IntervalSync, CycleKind::Full)
    }

    fn start(&mut self, now: Instant, state: TickState, kind: CycleKind) -> Decision {
        self.last_cycle = Some(now);
        Decision::run(state, kind)
    }
}

/// Time until the window next opens, clamped so triggers stay responsive
fn until_window_opens(start: NaiveTime, now: NaiveDateTime) -> Duration {
    let mut target = now.date().and_time(start);
    if target <= now {
        target += TimeDelta::days(1);
    }
    let wait = (target - now).to_std().unwrap_or(WINDOW_SLEEP_MIN);
    wait.clamp(WINDOW_SLEEP_MIN, WINDOW_SLEEP_MAX)
}
