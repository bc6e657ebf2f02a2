//! Background file-system watchers
//!
//! Both watchers only record what they saw under a lock. The daemon loop
//! reads that state each tick; no sync work happens on watcher threads.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::config::Config;

fn is_write(event: &Event) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
}

/// Remembers the last file write under the output folders
pub struct FolderWriteWatcher {
    last_write: Arc<Mutex<Option<Instant>>>,
    handle: Option<RecommendedWatcher>,
}

impl FolderWriteWatcher {
    /// Watch `dirs` recursively; missing folders are skipped
    ///
    /// When no watcher can be created the folders always read as quiet.
    pub fn start(dirs: &[&Path]) -> Self {
        let last_write = Arc::new(Mutex::new(None));
        let shared = Arc::clone(&last_write);

        let watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
            Ok(event) if is_write(&event) && event.paths.iter().any(|p| !p.is_dir()) => {
                if let Ok(mut last) = shared.lock() {
                    *last = Some(Instant::now());
                }
                debug!("File activity detected: {:?}", event.paths);
            }
            Ok(_) => {}
            Err(e) => debug!("Watch error: {:?}", e),
        });

        let watcher = match watcher {
            Ok(mut watcher) => {
                for dir in dirs {
                    if !dir.is_dir() {
                        warn!("Watch folder does not exist (skipping): {:?}", dir);
                        continue;
                    }
                    match watcher.watch(dir, RecursiveMode::Recursive) {
                        Ok(()) => debug!("Watching folder for writes: {:?}", dir),
                        Err(e) => warn!("Could not watch {:?}: {}", dir, e),
                    }
                }
                Some(watcher)
            }
            Err(e) => {
                warn!("File watcher unavailable; write quiesce disabled: {}", e);
                None
            }
        };

        Self {
            last_write,
            handle: watcher,
        }
    }

    pub fn is_available(&self) -> bool {
        self.handle.is_some()
    }

    /// Most recent write seen, `None` when nothing was seen or the watcher is down
    pub fn last_write(&self) -> Option<Instant> {
        if !self.is_available() {
            return None;
        }
        self.last_write.lock().ok().and_then(|last| *last)
    }
}

/// Flags changes to the store database (and its write-ahead log)
pub struct StoreChangeWatcher {
    dirty: Arc<Mutex<bool>>,
    handle: Option<RecommendedWatcher>,
}

impl StoreChangeWatcher {
    pub fn start(store_db: &Path) -> Self {
        let dirty = Arc::new(Mutex::new(false));
        let Some(db_dir) = store_db.parent().filter(|d| d.is_dir()).map(PathBuf::from) else {
            warn!("Store directory not found; fast trigger disabled: {:?}", store_db);
            return Self {
                dirty,
                handle: None,
            };
        };

        let shared = Arc::clone(&dirty);
        let watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            let Ok(event) = res else {
                return;
            };
            if is_write(&event) && event.paths.iter().any(|p| is_store_file(p)) {
                if let Ok(mut dirty) = shared.lock() {
                    if !*dirty {
                        debug!("Store change detected; queuing fast export");
                    }
                    *dirty = true;
                }
            }
        })
        .and_then(|mut watcher| {
            watcher.watch(&db_dir, RecursiveMode::NonRecursive)?;
            Ok(watcher)
        });

        match watcher {
            Ok(watcher) => {
                debug!("Watching store for changes: {:?}", db_dir);
                Self {
                    dirty,
                    handle: Some(watcher),
                }
            }
            Err(e) => {
                warn!("Store watcher unavailable; fast trigger disabled: {}", e);
                Self {
                    dirty,
                    handle: None,
                }
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.handle.is_some()
    }

    /// Whether a change was seen since the last call; clears the flag
    pub fn consume(&self) -> bool {
        self.dirty
            .lock()
            .map(|mut dirty| std::mem::take(&mut *dirty))
            .unwrap_or(false)
    }
}

/// Paths the daemon's watchers are armed on
#[derive(Debug, Clone, PartialEq, Eq)]
struct WatchedPaths {
    folders: [PathBuf; 2],
    store_db: Option<PathBuf>,
}

impl WatchedPaths {
    fn of(config: &Config) -> Self {
        Self {
            folders: [config.folder_md.clone(), config.folder_tb.clone()],
            store_db: config
                .fast_trigger_on_db_change
                .then(|| config.store_db.clone()),
        }
    }
}

/// The folder and store watchers of a running daemon
///
/// Re-armed whenever a reloaded config moves the watched paths.
pub struct DaemonWatchers {
    paths: WatchedPaths,
    folders: FolderWriteWatcher,
    store: Option<StoreChangeWatcher>,
}

impl DaemonWatchers {
    pub fn arm(config: &Config) -> Self {
        let paths = WatchedPaths::of(config);
        let folders = FolderWriteWatcher::start(&[paths.folders[0].as_path(), paths.folders[1].as_path()]);
        let store = paths.store_db.as_deref().map(StoreChangeWatcher::start);
        Self {
            paths,
            folders,
            store,
        }
    }

    /// Re-arm when `config` watches different paths; returns whether it did
    pub fn refresh(&mut self, config: &Config) -> bool {
        if WatchedPaths::of(config) == self.paths {
            return false;
        }
        info!("Watched paths changed; re-arming watchers");
        *self = Self::arm(config);
        true
    }

    pub fn folders_available(&self) -> bool {
        self.folders.is_available()
    }

    pub fn last_write(&self) -> Option<Instant> {
        self.folders.last_write()
    }

    /// Whether the store changed since the last call
    pub fn store_changed(&self) -> bool {
        self.store.as_ref().is_some_and(StoreChangeWatcher::consume)
    }
}

fn is_store_file(path: &Path) -> bool {
    let name = path.to_string_lossy();
    name.ends_with(".sqlite") || name.ends_with(".sqlite-wal")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Poll `check` for up to five seconds
    fn wait_for(mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(50));
        }
        false
    }

    #[test]
    fn test_store_file_names() {
        assert!(is_store_file(Path::new("/x/database.sqlite")));
        assert!(is_store_file(Path::new("/x/database.sqlite-wal")));
        assert!(!is_store_file(Path::new("/x/database.sqlite-shm")));
    }

    #[test]
    fn test_folder_write_recorded() {
        let dir = TempDir::new().unwrap();
        let watcher = FolderWriteWatcher::start(&[dir.path()]);
        if !watcher.is_available() {
            eprintln!("skipping: no file watcher on this platform");
            return;
        }
        assert!(watcher.last_write().is_none());

        let before = Instant::now();
        fs::write(dir.path().join("note.md"), "x").unwrap();
        assert!(
            wait_for(|| watcher.last_write().is_some()),
            "write was never recorded"
        );
        assert!(watcher.last_write().unwrap() >= before);
    }

    #[test]
    fn test_store_change_consumed_once() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("database.sqlite");
        fs::write(&db, "").unwrap();
        let watcher = StoreChangeWatcher::start(&db);
        if !watcher.is_available() {
            eprintln!("skipping: no file watcher on this platform");
            return;
        }
        assert!(!watcher.consume());

        fs::write(dir.path().join("database.sqlite-wal"), "x").unwrap();
        assert!(wait_for(|| watcher.consume()), "store change was never seen");

        // Follow-up events for the same write may still land; once they
        // settle, the flag stays clear until the next change
        thread::sleep(Duration::from_millis(500));
        watcher.consume();
        thread::sleep(Duration::from_millis(300));
        assert!(!watcher.consume());

        fs::write(dir.path().join("database.sqlite-wal"), "y").unwrap();
        assert!(wait_for(|| watcher.consume()), "second change was never seen");
    }

    #[test]
    fn test_non_store_files_ignored() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("database.sqlite");
        fs::write(&db, "").unwrap();
        let watcher = StoreChangeWatcher::start(&db);
        if !watcher.is_available() {
            eprintln!("skipping: no file watcher on this platform");
            return;
        }

        fs::write(dir.path().join("database.sqlite-shm"), "x").unwrap();
        thread::sleep(Duration::from_millis(500));
        assert!(!watcher.consume());
    }

    fn config_in(root: &Path, md: &str) -> Config {
        Config {
            folder_md: root.join(md),
            folder_tb: root.join("tb"),
            store_db: root.join("store/database.sqlite"),
            ..Config::default()
        }
    }

    #[test]
    fn test_watchers_rearm_on_moved_folder() {
        let dir = TempDir::new().unwrap();
        let first = config_in(dir.path(), "md");
        let mut watchers = DaemonWatchers::arm(&first);
        if !watchers.folders_available() {
            eprintln!("skipping: no file watcher on this platform");
            return;
        }
        assert!(!watchers.refresh(&first));

        // Folder created only after the daemon started
        let moved = config_in(dir.path(), "md-new");
        fs::create_dir_all(&moved.folder_md).unwrap();
        assert!(watchers.refresh(&moved));
        assert!(!watchers.refresh(&moved));

        fs::write(moved.folder_md.join("note.md"), "x").unwrap();
        assert!(
            wait_for(|| watchers.last_write().is_some()),
            "write in the new folder was never recorded"
        );
    }

    #[test]
    fn test_fast_trigger_off_arms_no_store_watcher() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(dir.path(), "md");
        config.fast_trigger_on_db_change = false;
        let mut watchers = DaemonWatchers::arm(&config);
        assert!(!watchers.store_changed());

        config.fast_trigger_on_db_change = true;
        assert!(watchers.refresh(&config));
    }

    #[test]
    fn test_missing_store_dir_disables_watcher() {
        let watcher = StoreChangeWatcher::start(Path::new("/nonexistent/dir/database.sqlite"));
        assert!(!watcher.consume());
    }
}
