//! Note ⇄ file conversion
//!
//! - **tags**: tag extraction, tag-derived folders, folder-derived tags
//! - **links**: image link matchers and rewrites
//! - **bundle**: the `.textbundle` directory layout

pub mod bundle;
pub mod links;
pub mod tags;

pub use bundle::{Bundle, BundleInfo};
pub use tags::{destinations, extract_tags, TagFilter};

use crate::identity;

const TITLE_LIMIT: usize = 225;

/// File-system safe title: truncated, path separators replaced
pub fn clean_title(title: &str) -> String {
    let truncated: String = title.chars().take(TITLE_LIMIT).collect();
    let cleaned = truncated.trim().replace(['/', '\\', ':'], "-");
    let cleaned = cleaned.trim_end_matches('-');
    if cleaned.is_empty() {
        "Untitled".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Body as written to disk: optional tag hiding, then the identity marker
pub fn render_body(body: &str, id: &str, hide_tags: bool) -> String {
    if hide_tags {
        identity::embed(&tags::hide_tag_lines(body), id)
    } else {
        identity::embed(body, id)
    }
}

/// First non-empty line with any heading markers removed
pub fn title_from_text(text: &str) -> Option<String> {
    text.lines()
        .map(|line| line.trim_start_matches('#').trim())
        .find(|line| !line.is_empty())
        .map(str::to_string)
}
