//! macOS integration points
//!
//! Every helper here degrades to a no-op (or "nothing found") on other
//! platforms and when the underlying tool fails.

use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::LazyLock;

use chrono::{DateTime, Local, Utc};
use regex::Regex;
use tracing::debug;

use crate::pipeline::FileTagReader;

/// Bundle identifier fragments of editors that write into the output folders
const EDITOR_KEYWORDS: &[&str] = &["ulysses", "obsidian", "typora", "bear"];

const FRONTMOST_SCRIPT: &str = "tell application \"System Events\" to get bundle identifier \
     of first process whose frontmost is true";

/// Reads the Finder tag list as JSON; `$1` is the file
const FINDER_TAGS_SCRIPT: &str = "xattr -p com.apple.metadata:_kMDItemUserTags \"$1\" 2>/dev/null \
     | xxd -r -p | plutil -convert json - -o - 2>/dev/null";

/// Finder appends a colour index to each tag name
static TAG_COLOUR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\d{1,2}$").expect("valid tag colour regex"));

/// Set the Finder creation date of a newly written file
pub fn set_creation_date(path: &Path, created: DateTime<Utc>) {
    if !cfg!(target_os = "macos") {
        return;
    }
    let stamp = created.with_timezone(&Local).format("%m/%d/%Y %H:%M:%S").to_string();
    match Command::new("SetFile")
        .arg("-d")
        .arg(&stamp)
        .arg(path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if !status.success() => debug!("SetFile failed for {:?}: {}", path, status),
        Ok(_) => {}
        Err(e) => debug!("SetFile unavailable: {}", e),
    }
}

/// Reports whether an external editor currently has focus
pub trait EditorProbe {
    fn editor_active(&self) -> bool;
}

/// Asks System Events for the frontmost application's bundle identifier
#[derive(Debug, Default, Clone, Copy)]
pub struct FrontmostApp;

impl EditorProbe for FrontmostApp {
    fn editor_active(&self) -> bool {
        if !cfg!(target_os = "macos") {
            return false;
        }
        let output = match Command::new("osascript")
            .arg("-e")
            .arg(FRONTMOST_SCRIPT)
            .stderr(Stdio::null())
            .output()
        {
            Ok(output) => output,
            Err(e) => {
                debug!("Foreground probe failed: {}", e);
                return false;
            }
        };
        is_editor_bundle(&String::from_utf8_lossy(&output.stdout))
    }
}

fn is_editor_bundle(bundle_id: &str) -> bool {
    let active = bundle_id.trim().to_lowercase();
    !active.is_empty() && EDITOR_KEYWORDS.iter().any(|kw| active.contains(kw))
}

/// Reads Finder tags through `xattr`
#[derive(Debug, Default, Clone, Copy)]
pub struct FinderTags;

impl FileTagReader for FinderTags {
    fn tags(&self, path: &Path) -> Vec<String> {
        if !cfg!(target_os = "macos") {
            return Vec::new();
        }
        let output = Command::new("sh")
            .arg("-c")
            .arg(FINDER_TAGS_SCRIPT)
            .arg("sh")
            .arg(path)
            .stderr(Stdio::null())
            .output();
        match output {
            Ok(output) => parse_finder_tags(&String::from_utf8_lossy(&output.stdout)),
            Err(e) => {
                debug!("Could not read Finder tags of {:?}: {}", path, e);
                Vec::new()
            }
        }
    }
}

fn parse_finder_tags(json: &str) -> Vec<String> {
    serde_json::from_str::<Vec<String>>(json.trim())
        .unwrap_or_default()
        .into_iter()
        .map(|tag| TAG_COLOUR_RE.replace(&tag, "").into_owned())
        .filter(|tag| !tag.trim().is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_editor_bundles() {
        assert!(is_editor_bundle("md.obsidian\n"));
        assert!(is_editor_bundle("com.ulyssesapp.mac"));
        assert!(is_editor_bundle("net.shinyfrog.bear"));
        assert!(!is_editor_bundle("com.apple.Safari"));
        assert!(!is_editor_bundle(""));
    }

    #[test]
    fn test_parse_finder_tags() {
        assert_eq!(
            parse_finder_tags("[\"Red\\n6\",\"to do\",\"Work\\n12\"]\n"),
            vec!["Red", "to do", "Work"]
        );
        assert!(parse_finder_tags("").is_empty());
        assert!(parse_finder_tags("not json").is_empty());
    }

    #[test]
    fn test_creation_date_leaves_content_and_mtime() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("Plan.md");
        let modified = crate::timestamp::from_unix_seconds(1_700_000_000.0);
        crate::timestamp::write_stamped(&path, b"Plan", Some(modified)).unwrap();

        set_creation_date(&path, crate::timestamp::from_unix_seconds(1_600_000_000.0));
        assert_eq!(std::fs::read(&path).unwrap(), b"Plan");
        assert_eq!(crate::timestamp::mtime(&path), Some(modified));
    }
}
