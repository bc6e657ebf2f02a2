//! Record store adapter
//!
//! - **reader**: SQL queries against the store database (live or snapshot)
//! - **command**: fire-and-forget write commands
//!
//! The store is the system of record. Reads are synchronous; writes are
//! one-way and unacknowledged.

pub mod command;
pub mod reader;

#[cfg(test)]
pub(crate) mod fixture;

pub use command::{
    decode_path, encode_path, CommandSink, NoteTarget, RecordingSink, SettleDelays, StoreCommand,
    UrlSchemeDispatcher,
};
pub use reader::NoteStore;
