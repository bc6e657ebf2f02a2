//! notesync Core Library
//!
//! Keeps a Bear-style note store and a folder of plain files in step, in
//! both directions. Notes are exported as markdown files or `.textbundle`
//! directories; edits made to those files are pushed back into the store.
//!
//! # Architecture
//!
//! - The store is the system of record. It is read through SQLite and
//!   written through one-way commands that are never acknowledged.
//! - Every exported file carries the note identifier in a hidden marker so
//!   edits can be routed back to the right note.
//! - Exports are built in a staging area and mirrored into place, so an
//!   unchanged note never touches its published file.
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load_or_materialize(&Config::config_file_path())?;
//! let options = config.sync_options(ExportFormat::Flat);
//! let sink = UrlSchemeDispatcher::new(SettleDelays::default());
//! let outcome = pipeline::run(&options, &sink, &NoFileTags)?;
//! ```
//!
//! # Modules
//!
//! - `store`: store reads and write commands
//! - `identity`: identifier markers embedded in note bodies
//! - `convert`: tags, links and bundle layout
//! - `assets`: attachment copies and image uploads
//! - `detect`, `conflict`, `state`: change tracking between passes
//! - `pipeline`: export and import passes
//! - `daemon`: scheduler, watchers and the background loop
//! - `platform`: macOS helpers (foreground editor, creation dates, Finder tags)
//! - `config`: daemon configuration

pub mod assets;
pub mod config;
pub mod conflict;
pub mod convert;
pub mod daemon;
pub mod detect;
pub mod error;
pub mod identity;
pub mod models;
pub mod pipeline;
pub mod platform;
pub mod state;
pub mod store;
pub mod timestamp;

pub use config::{Config, ConfigError, SyncWindow};
pub use error::{SyncError, SyncResult};
pub use models::{Attachment, ExportFormat, NoteRecord};
pub use pipeline::{FileTagReader, NoFileTags, RunOutcome, SyncOptions};
pub use state::SyncState;
pub use store::{CommandSink, NoteStore, RecordingSink, SettleDelays, StoreCommand, UrlSchemeDispatcher};
