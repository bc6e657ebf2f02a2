//! Time conversions between the store, the file system and display strings
//!
//! The store keeps REAL seconds since its own epoch (2001-01-01). Everything
//! in this crate compares UTC instants, so store values are shifted on read.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Local, TimeZone, Utc};

/// Offset from the store epoch to the UNIX epoch: 31 years of 365.25 days
/// plus a 6 hour timezone-safety margin.
pub const STORE_EPOCH_OFFSET: f64 = 365.25 * 24.0 * 3600.0 * 31.0 + 3600.0 * 6.0;

/// Convert a store timestamp to a UTC instant
pub fn from_store_seconds(seconds: f64) -> DateTime<Utc> {
    from_unix_seconds(seconds + STORE_EPOCH_OFFSET)
}

/// Convert a UTC instant to a store timestamp
pub fn to_store_seconds(at: DateTime<Utc>) -> f64 {
    to_unix_seconds(at) - STORE_EPOCH_OFFSET
}

/// Convert fractional UNIX seconds to a UTC instant
pub fn from_unix_seconds(seconds: f64) -> DateTime<Utc> {
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0) as u32;
    Utc.timestamp_opt(whole as i64, nanos)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

pub fn to_unix_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp() as f64 + f64::from(at.timestamp_subsec_nanos()) / 1e9
}

/// Modification time of a file or directory, `None` if it can't be read
pub fn mtime(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Set the modification time of an existing file or directory
pub fn set_mtime(path: &Path, at: DateTime<Utc>) -> io::Result<()> {
    let file = File::open(path)?;
    file.set_modified(SystemTime::from(at))
}

/// Write `content` to `path`, then stamp it with `modified` when given
///
/// Returns whether the file was newly created.
pub fn write_stamped(path: &Path, content: &[u8], modified: Option<DateTime<Utc>>) -> io::Result<bool> {
    let is_new = !path.exists();
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(content)?;
    if let Some(at) = modified {
        file.set_modified(SystemTime::from(at))?;
    }
    Ok(is_new)
}

/// ` - 2024-03-01_0915` suffix used for backup file names
pub fn backup_suffix(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format(" - %Y-%m-%d_%H%M").to_string()
}

/// `2024-03-01 at 09:15` used in conflict banners
pub fn banner_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d at %H:%M").to_string()
}
