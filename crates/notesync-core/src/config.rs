//! Daemon configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/notesync/config.toml)
//! 3. Environment variables (NOTESYNC_* prefix)
//!
//! Environment variables take precedence over config file values. The file
//! is re-read at the top of every daemon tick, so interval, window and quiet
//! period changes take effect without a restart.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::ExportFormat;
use crate::pipeline::SyncOptions;
use crate::store::SettleDelays;

/// Environment variable prefix
const ENV_PREFIX: &str = "NOTESYNC";

/// Lower bound for the polling interval
pub const MIN_INTERVAL_SECONDS: u64 = 30;

/// Errors raised while loading or saving the configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No config file existed; one with defaults has been written
    #[error("Config not found - created default at {path:?}. Please review paths and restart.")]
    Materialized { path: PathBuf },

    #[error("Config file not found: {path:?}")]
    Missing { path: PathBuf },

    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to write config file {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Time-of-day window during which scheduled cycles may run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncWindow {
    #[serde(default = "default_start_hour")]
    pub start_hour: u32,
    #[serde(default)]
    pub start_minute: u32,
    #[serde(default = "default_end_hour")]
    pub end_hour: u32,
    #[serde(default = "default_end_minute")]
    pub end_minute: u32,
}

impl Default for SyncWindow {
    fn default() -> Self {
        Self {
            start_hour: default_start_hour(),
            start_minute: 0,
            end_hour: default_end_hour(),
            end_minute: default_end_minute(),
        }
    }
}

impl SyncWindow {
    pub fn start(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.start_hour.min(23), self.start_minute.min(59), 0)
            .unwrap_or(NaiveTime::MIN)
    }

    pub fn end(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.end_hour.min(23), self.end_minute.min(59), 0)
            .unwrap_or(NaiveTime::MIN)
    }

    /// Whether `now` falls inside `[start, end)`
    pub fn contains(&self, now: NaiveTime) -> bool {
        self.start() <= now && now < self.end()
    }
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Note store database
    #[serde(default = "default_store_db")]
    pub store_db: PathBuf,

    /// Folder holding the store's attachment bytes (`<id>/<filename>`)
    #[serde(default = "default_store_images")]
    pub store_images: PathBuf,

    /// Scratch area shared by every phase
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Log file (stdout is always logged to as well)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    #[serde(default = "default_folder_md")]
    pub folder_md: PathBuf,
    #[serde(default = "default_folder_tb")]
    pub folder_tb: PathBuf,
    #[serde(default = "default_backup_md")]
    pub backup_md: PathBuf,
    #[serde(default = "default_backup_tb")]
    pub backup_tb: PathBuf,

    #[serde(default = "default_interval")]
    pub sync_interval_seconds: u64,

    #[serde(default)]
    pub sync_on_startup: bool,

    /// Seconds of folder silence required before a cycle may start
    #[serde(default = "default_quiet")]
    pub write_quiet_seconds: f64,

    /// Run an export-only cycle as soon as the store database changes
    #[serde(default = "default_true")]
    pub fast_trigger_on_db_change: bool,

    /// Place extra copies of each note in folders derived from its tags
    #[serde(default)]
    pub tag_folders: bool,

    #[serde(default)]
    pub hide_tags: bool,

    #[serde(default)]
    pub exclude_tags: Vec<String>,

    #[serde(default)]
    pub only_export_tags: Vec<String>,

    #[serde(default)]
    pub sync_window: SyncWindow,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_db: default_store_db(),
            store_images: default_store_images(),
            staging_dir: default_staging_dir(),
            log_file: None,
            folder_md: default_folder_md(),
            folder_tb: default_folder_tb(),
            backup_md: default_backup_md(),
            backup_tb: default_backup_tb(),
            sync_interval_seconds: default_interval(),
            sync_on_startup: false,
            write_quiet_seconds: default_quiet(),
            fast_trigger_on_db_change: true,
            tag_folders: false,
            hide_tags: false,
            exclude_tags: Vec::new(),
            only_export_tags: Vec::new(),
            sync_window: SyncWindow::default(),
        }
    }
}

impl Config {
    /// Load configuration for a daemon or one-shot run
    ///
    /// A missing file is materialized with defaults and reported as
    /// [`ConfigError::Materialized`] so the operator reviews it before the
    /// first real run.
    pub fn load_or_materialize(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            Self::default().save_to_path(path)?;
            return Err(ConfigError::Materialized {
                path: path.to_path_buf(),
            });
        }
        Self::load_existing(path)
    }

    /// Load configuration from a file that must already exist
    ///
    /// Used for hot reload, where a vanished file must not be recreated.
    pub fn load_existing(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Missing {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(base) = path.parent() {
            config.resolve_relative(base);
        }
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self, toml::de::Error> {
        Self::parse(toml_content)
    }

    fn parse(toml_content: &str) -> Result<Self, toml::de::Error> {
        let mut config: Config = toml::from_str(toml_content)?;
        config.apply_env_overrides();
        config.sync_interval_seconds = config.sync_interval_seconds.max(MIN_INTERVAL_SECONDS);
        if !config.write_quiet_seconds.is_finite() || config.write_quiet_seconds < 0.0 {
            config.write_quiet_seconds = default_quiet();
        }
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // NOTESYNC_STORE_DB
        if let Ok(val) = std::env::var(format!("{}_STORE_DB", ENV_PREFIX)) {
            if !val.is_empty() {
                self.store_db = PathBuf::from(val);
            }
        }

        // NOTESYNC_STAGING_DIR
        if let Ok(val) = std::env::var(format!("{}_STAGING_DIR", ENV_PREFIX)) {
            if !val.is_empty() {
                self.staging_dir = PathBuf::from(val);
            }
        }
    }

    /// Resolve relative folder paths against the config file's directory
    fn resolve_relative(&mut self, base: &Path) {
        for path in [
            &mut self.folder_md,
            &mut self.folder_tb,
            &mut self.backup_md,
            &mut self.backup_tb,
            &mut self.staging_dir,
        ] {
            if path.is_relative() {
                *path = normalize(&base.join(&*path));
            }
        }
        if let Some(log_file) = self.log_file.as_mut() {
            if log_file.is_relative() {
                *log_file = normalize(&base.join(&*log_file));
            }
        }
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Get the config file path
    ///
    /// Can be overridden with NOTESYNC_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("notesync")
            .join("config.toml")
    }

    /// Resolve the config path from an optional CLI override
    pub fn path_with_cli_override(cli_path: Option<&PathBuf>) -> PathBuf {
        cli_path.cloned().unwrap_or_else(Self::config_file_path)
    }

    /// Get the log file path (configured or default)
    pub fn log_path(&self) -> PathBuf {
        self.log_file.clone().unwrap_or_else(|| data_dir().join("notesync.log"))
    }

    /// Get the presence file path recording the running daemon's pid
    pub fn presence_path(&self) -> PathBuf {
        data_dir().join("notesync.pid")
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_seconds.max(MIN_INTERVAL_SECONDS))
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_secs_f64(self.write_quiet_seconds.max(0.0))
    }

    /// Output and backup roots for one format
    pub fn roots(&self, format: ExportFormat) -> (&Path, &Path) {
        match format {
            ExportFormat::Flat => (&self.folder_md, &self.backup_md),
            ExportFormat::Bundle => (&self.folder_tb, &self.backup_tb),
        }
    }

    /// Build the options for one format-specific phase
    pub fn sync_options(&self, format: ExportFormat) -> SyncOptions {
        let (out_root, backup_root) = self.roots(format);
        SyncOptions {
            out_root: out_root.to_path_buf(),
            backup_root: backup_root.to_path_buf(),
            assets_root: None,
            format,
            skip_import: false,
            skip_export: false,
            exclude_tags: self.exclude_tags.clone(),
            only_export_tags: self.only_export_tags.clone(),
            hide_tags: self.hide_tags,
            tag_folders: self.tag_folders,
            store_db: self.store_db.clone(),
            store_images: self.store_images.clone(),
            staging_dir: self.staging_dir.clone(),
            settle: SettleDelays::default(),
        }
    }
}

/// Lexically remove `.` and `..` components
fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("notesync")
}

fn store_container() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Library/Group Containers/9K33E3U3T4.net.shinyfrog.bear/Application Data")
}

fn default_store_db() -> PathBuf {
    store_container().join("database.sqlite")
}

fn default_store_images() -> PathBuf {
    store_container().join("Local Files/Note Images")
}

fn default_staging_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("notesync")
        .join("staging")
}

fn default_folder_md() -> PathBuf {
    PathBuf::from("./Export/MD_Export")
}

fn default_folder_tb() -> PathBuf {
    PathBuf::from("./Export/TB_Export")
}

fn default_backup_md() -> PathBuf {
    PathBuf::from("./Backup/MD_Backup")
}

fn default_backup_tb() -> PathBuf {
    PathBuf::from("./Backup/TB_Backup")
}

fn default_interval() -> u64 {
    180
}

fn default_quiet() -> f64 {
    5.0
}

fn default_true() -> bool {
    true
}

fn default_start_hour() -> u32 {
    6
}

fn default_end_hour() -> u32 {
    23
}

fn default_end_minute() -> u32 {
    20
}
