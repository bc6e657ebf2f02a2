//! Data models for notesync
//!
//! Defines the records read from the note store and the two shapes a note
//! takes on disk. Records are owned by the store; this crate only reads them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A note as read from the record store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NoteRecord {
    /// Store-internal row key, used to look up the note's attachment table
    pub pk: i64,
    /// Stable identifier that survives edits and renames
    pub id: String,
    /// Note title (first line of the body, maintained by the store)
    pub title: String,
    /// Note body content
    pub body: String,
    /// When this note was created
    pub created: DateTime<Utc>,
    /// When this note was last modified in the store
    pub modified: DateTime<Utc>,
    pub trashed: bool,
    pub archived: bool,
}

impl NoteRecord {
    /// Whether the note belongs in an export pass
    pub fn is_active(&self) -> bool {
        !self.trashed && !self.archived
    }
}

/// One row of a note's attachment table
///
/// Markdown links in the body name the attachment by filename only; the
/// attachment id is the directory the store keeps the bytes in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Attachment {
    pub filename: String,
    pub id: String,
}

/// On-disk shape of exported notes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Single markdown file per note, images in a shared repository folder
    #[default]
    #[serde(rename = "md")]
    Flat,
    /// Self-contained `.textbundle` directory per note
    #[serde(rename = "tb")]
    Bundle,
}

impl ExportFormat {
    /// Short name used on the command line and in log labels
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Flat => "md",
            ExportFormat::Bundle => "tb",
        }
    }

    /// Upper-case label for phase logging ("MD-import", "TB-export")
    pub fn label(&self) -> &'static str {
        match self {
            ExportFormat::Flat => "MD",
            ExportFormat::Bundle => "TB",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md" | "flat" | "markdown" => Ok(ExportFormat::Flat),
            "tb" | "bundle" | "textbundle" => Ok(ExportFormat::Bundle),
            other => Err(format!("Unknown export format '{}' (expected md or tb)", other)),
        }
    }
}
