//! Presence file of the running daemon
//!
//! The daemon writes its pid on startup and removes the file on exit. A
//! file left behind by a crashed daemon is removed the next time someone
//! looks for a live daemon.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// Bytes read from the end of the log for a status report
const TAIL_BYTES: u64 = 4096;

/// Non-empty log lines shown in a status report
pub const TAIL_LINES: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presence {
    path: PathBuf,
}

impl Presence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record this process as the running daemon
    pub fn claim(&self) -> SyncResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| SyncError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&self.path, std::process::id().to_string())
            .map_err(|e| SyncError::from_io(e, &self.path))
    }

    pub fn release(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            debug!("Could not remove presence file {:?}: {}", self.path, e);
        }
    }

    /// Pid of a live daemon
    ///
    /// A file naming a process that no longer exists is removed.
    pub fn live_pid(&self) -> Option<i32> {
        let pid: i32 = fs::read_to_string(&self.path).ok()?.trim().parse().ok()?;
        match probe(pid) {
            Liveness::Alive => Some(pid),
            Liveness::Gone => {
                debug!("Removing stale presence file for pid {}", pid);
                self.release();
                None
            }
            Liveness::Unknown => None,
        }
    }

    /// Ask the running daemon to start a full cycle now
    pub fn trigger(&self) -> Result<i32> {
        let Some(pid) = self.live_pid() else {
            bail!("No running daemon found (is it started without --once?)");
        };
        send_trigger(pid).with_context(|| format!("Failed to signal daemon (pid={})", pid))?;
        Ok(pid)
    }
}

enum Liveness {
    Alive,
    Gone,
    Unknown,
}

#[cfg(unix)]
fn probe(pid: i32) -> Liveness {
    if pid <= 0 {
        return Liveness::Unknown;
    }
    // SAFETY: signal 0 only checks that the process exists
    if unsafe { libc::kill(pid, 0) } == 0 {
        return Liveness::Alive;
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::ESRCH) => Liveness::Gone,
        _ => Liveness::Unknown,
    }
}

#[cfg(not(unix))]
fn probe(_pid: i32) -> Liveness {
    Liveness::Unknown
}

#[cfg(unix)]
fn send_trigger(pid: i32) -> std::io::Result<()> {
    // SAFETY: plain signal delivery to a pid we just checked
    if unsafe { libc::kill(pid, libc::SIGUSR1) } == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_trigger(_pid: i32) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "triggers need unix signals",
    ))
}

/// Last `lines` non-empty lines within the final few KiB of `log`
pub fn tail_log(log: &Path, lines: usize) -> std::io::Result<Vec<String>> {
    let mut file = File::open(log)?;
    let size = file.metadata()?.len();
    file.seek(SeekFrom::Start(size.saturating_sub(TAIL_BYTES)))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;

    let text = String::from_utf8_lossy(&bytes);
    let kept: Vec<String> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect();
    let skip = kept.len().saturating_sub(lines);
    Ok(kept.into_iter().skip(skip).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_claim_and_find_self() {
        let dir = TempDir::new().unwrap();
        let presence = Presence::new(dir.path().join("run/notesync.pid"));
        assert!(presence.live_pid().is_none());

        presence.claim().unwrap();
        assert_eq!(presence.live_pid(), Some(std::process::id() as i32));

        presence.release();
        assert!(!presence.path().exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_stale_file_removed() {
        let dir = TempDir::new().unwrap();
        let presence = Presence::new(dir.path().join("notesync.pid"));
        // Beyond the default pid_max, so no such process
        fs::write(presence.path(), "99999999").unwrap();

        assert!(presence.live_pid().is_none());
        assert!(!presence.path().exists());
        assert!(presence.trigger().is_err());
    }

    #[test]
    fn test_garbage_file_is_not_a_daemon() {
        let dir = TempDir::new().unwrap();
        let presence = Presence::new(dir.path().join("notesync.pid"));
        fs::write(presence.path(), "not a pid").unwrap();
        assert!(presence.live_pid().is_none());
    }

    #[test]
    fn test_tail_log() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("notesync.log");
        let mut content = String::new();
        for i in 0..10 {
            content.push_str(&format!("line {}\n\n", i));
        }
        fs::write(&log, content).unwrap();

        let tail = tail_log(&log, TAIL_LINES).unwrap();
        assert_eq!(tail.len(), 6);
        assert_eq!(tail[0], "line 4");
        assert_eq!(tail[5], "line 9");
    }

    #[test]
    fn test_tail_reads_only_the_end() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("notesync.log");
        let mut content = "x".repeat(10_000);
        content.push_str("\nlast\n");
        fs::write(&log, content).unwrap();

        let tail = tail_log(&log, TAIL_LINES).unwrap();
        assert_eq!(tail.last().map(String::as_str), Some("last"));
        assert!(tail[0].len() < 4096);
    }
}
