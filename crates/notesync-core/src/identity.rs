//! Note identity markers
//!
//! Every exported file carries its store identifier in a markdown comment
//! that renders as nothing:
//!
//! ```text
//! Plan
//! [//]: # ({BearID:3F1C...})
//! rest of the body
//! ```
//!
//! Older exports used an HTML comment (`<!-- {BearID:...} -->`). Extraction
//! tries the current syntax first and falls back to the legacy one.

use std::sync::LazyLock;

use regex::Regex;

/// Current marker, including the line break that follows it
static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[//\]: # \(\{BearID:(.+?)\}\)\n?").expect("valid marker regex"));

/// Legacy HTML-comment marker, including the line break that follows it
static LEGACY_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<!-- ?\{BearID:(.+?)\} ?-->\n?").expect("valid legacy regex"));

/// Which marker syntax an identifier was found in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerSyntax {
    Current,
    Legacy,
}

/// A body with its identity marker removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Untagged {
    /// Identifier found in the body, if any
    pub id: Option<String>,
    pub syntax: Option<MarkerSyntax>,
    /// Body without the marker
    pub text: String,
}

/// Format the current marker for `id`
pub fn marker(id: &str) -> String {
    format!("[//]: # ({{BearID:{}}})", id)
}

/// Identifier embedded in `text`, current syntax first
pub fn extract(text: &str) -> Option<String> {
    find(text).map(|(id, _)| id)
}

fn find(text: &str) -> Option<(String, MarkerSyntax)> {
    if let Some(caps) = MARKER_RE.captures(text) {
        return Some((caps[1].to_string(), MarkerSyntax::Current));
    }
    LEGACY_MARKER_RE
        .captures(text)
        .map(|caps| (caps[1].to_string(), MarkerSyntax::Legacy))
}

/// Remove the marker syntax that matched and report the identifier
pub fn strip(text: &str) -> Untagged {
    match find(text) {
        Some((id, MarkerSyntax::Current)) => Untagged {
            id: Some(id),
            syntax: Some(MarkerSyntax::Current),
            text: MARKER_RE.replace_all(text, "").into_owned(),
        },
        Some((id, MarkerSyntax::Legacy)) => Untagged {
            id: Some(id),
            syntax: Some(MarkerSyntax::Legacy),
            text: LEGACY_MARKER_RE.replace_all(text, "").into_owned(),
        },
        None => Untagged {
            id: None,
            syntax: None,
            text: text.to_string(),
        },
    }
}

/// Remove markers of both syntaxes
pub fn strip_all(text: &str) -> String {
    let text = MARKER_RE.replace_all(text, "");
    LEGACY_MARKER_RE.replace_all(&text, "").into_owned()
}

/// Insert the marker for `id` as the second line of `text`
///
/// Any marker already present is removed first, so embedding is idempotent.
/// A single-line body gets the marker appended on its own line.
pub fn embed(text: &str, id: &str) -> String {
    let clean = strip_all(text);
    match clean.split_once('\n') {
        Some((first, rest)) => format!("{}\n{}\n{}", first, marker(id), rest),
        None => format!("{}\n{}", clean, marker(id)),
    }
}

/// Append the marker after a blank line (bundle text layout)
pub fn append(text: &str, id: &str) -> String {
    format!("{}\n\n{}\n", strip_all(text).trim_end(), marker(id))
}
