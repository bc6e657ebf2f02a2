//! Tag extraction and tag-derived folder placement
//!
//! Two tag syntaxes appear in note bodies:
//!
//! - `#word`, `#nested/path`, `#.hidden`: ends at whitespace
//! - `#multi word tag#`: closed by a second `#`
//!
//! A tag only starts at the beginning of the text or after whitespace, so
//! `C#` and URL fragments are not tags. A `#word` that is really the start of
//! a multi-word tag (`#two words#`) is left to the second syntax.

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

/// Simple tag body at a `#`
static SIMPLE_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#([.\w/\-]+)").expect("valid tag regex"));

/// Remainder of a line that would close a multi-word tag
static MULTIWORD_TAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[/ \w]+\w#").expect("valid tail regex"));

/// Multi-word tag at a `#`, closed by `#` and then whitespace or the end
static MULTIWORD_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#([^ \d][.\w/ ]+?)#(?:[ \n]|$)").expect("valid multi-word tag regex")
});

/// Lines that consist of tags (hidden on export when requested)
static TAG_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*#[^\s#].*").expect("valid tag line regex"));

/// Allow and exclude lists, compared case-insensitively by prefix
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    only_export: Vec<String>,
    exclude: Vec<String>,
}

impl TagFilter {
    /// Entries may be given with or without the leading `#`
    pub fn new(only_export: &[String], exclude: &[String]) -> Self {
        Self {
            only_export: only_export.iter().filter_map(|t| normalize_entry(t)).collect(),
            exclude: exclude.iter().filter_map(|t| normalize_entry(t)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.only_export.is_empty() && self.exclude.is_empty()
    }

    /// Whether any of `tags` matches a blocked prefix
    pub fn vetoes<S: AsRef<str>>(&self, tags: &[S]) -> bool {
        tags.iter().any(|tag| {
            let tag = tag.as_ref().to_lowercase();
            self.exclude.iter().any(|blocked| tag.starts_with(blocked))
        })
    }

    /// Whether `tag` may get its own folder
    pub fn allows(&self, tag: &str) -> bool {
        if self.only_export.is_empty() {
            return true;
        }
        let tag = tag.to_lowercase();
        self.only_export.iter().any(|allowed| tag.starts_with(allowed))
    }
}

fn normalize_entry(entry: &str) -> Option<String> {
    let entry = entry.trim().trim_start_matches('#').trim_end_matches('#').trim();
    if entry.is_empty() {
        None
    } else {
        Some(entry.to_lowercase())
    }
}

/// All tags in `text`: simple tags first, then multi-word tags
pub fn extract_tags(text: &str) -> Vec<String> {
    let mut tags = scan(text, match_simple_tag);
    tags.extend(scan(text, match_multiword_tag));
    tags
}

/// Run `matcher` at every `#` that starts a word, resuming after each match
fn scan(text: &str, matcher: fn(&str) -> Option<(String, usize)>) -> Vec<String> {
    let mut tags = Vec::new();
    let mut pos = 0;
    while let Some(offset) = text[pos..].find('#') {
        let at = pos + offset;
        let starts_word = text[..at]
            .chars()
            .next_back()
            .map_or(true, char::is_whitespace);
        if starts_word {
            if let Some((tag, len)) = matcher(&text[at..]) {
                tags.push(tag);
                pos = at + len;
                continue;
            }
        }
        pos = at + 1;
    }
    tags
}

/// `#word`, shortened until it no longer looks like the start of `#multi word#`
///
/// Returns the tag and the number of bytes consumed (including one trailing
/// space or newline when present).
fn match_simple_tag(s: &str) -> Option<(String, usize)> {
    let caps = SIMPLE_TAG_RE.captures(s)?;
    let body = caps.get(1)?.as_str();

    let ends: Vec<usize> = body
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .rev()
        .collect();
    for end in ends {
        let after = &s[1 + end..];
        if after.starts_with(' ') || after.starts_with('\n') {
            if !MULTIWORD_TAIL_RE.is_match(&after[1..]) {
                return Some((body[..end].to_string(), end + 2));
            }
        }
        if !MULTIWORD_TAIL_RE.is_match(after) {
            return Some((body[..end].to_string(), end + 1));
        }
    }
    None
}

fn match_multiword_tag(s: &str) -> Option<(String, usize)> {
    let caps = MULTIWORD_TAG_RE.captures(s)?;
    Some((caps[1].to_string(), caps[0].len()))
}

/// Output paths for a note, before the format's file extension is added
///
/// The first path is always the primary copy at the root. In tag-folder mode
/// every allowed tag adds a copy under a folder named after it (`.name`
/// becomes the hidden-style `_name`). An excluded tag vetoes the whole note
/// and yields no paths.
pub fn destinations(
    root: &Path,
    filename: &str,
    text: &str,
    filter: &TagFilter,
    tag_folders: bool,
) -> Vec<PathBuf> {
    let tags = extract_tags(text);
    if filter.vetoes(&tags) {
        return Vec::new();
    }

    let mut paths = vec![root.join(filename)];
    if !tag_folders {
        return paths;
    }

    for tag in &tags {
        if tag == "/" || !filter.allows(tag) {
            continue;
        }
        let sub_path = match tag.strip_prefix('.') {
            Some(hidden) => format!("_{}", hidden),
            None => tag.clone(),
        };
        let Some(folder) = safe_relative(&sub_path) else {
            continue;
        };
        let path = root.join(folder).join(filename);
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    paths
}

/// Keep only normal components so a tag can never escape the root
fn safe_relative(sub_path: &str) -> Option<PathBuf> {
    let path: PathBuf = Path::new(sub_path)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();
    if path.as_os_str().is_empty() {
        None
    } else {
        Some(path)
    }
}

/// Tag implied by a file's folder, relative to the export root
///
/// `work/sub/Note.md` → `#work/sub`, `_inbox/Note.md` → `#.inbox`; names with
/// spaces are closed with a trailing `#`. Files at the root get no tag.
pub fn tag_from_path(relative: &Path) -> Option<String> {
    let mut folder = relative.parent()?;
    if folder
        .file_name()
        .map_or(false, |name| name.to_string_lossy().ends_with(".textbundle"))
    {
        folder = folder.parent()?;
    }
    let sub_path = folder.to_string_lossy().trim().to_string();
    if sub_path.is_empty() {
        return None;
    }
    let tag = match sub_path.strip_prefix('_') {
        Some(hidden) => format!("#.{}", hidden.trim()),
        None => format!("#{}", sub_path),
    };
    Some(close_tag(tag))
}

/// Format an OS-level file tag for the note body
pub fn format_file_tag(name: &str) -> String {
    close_tag(format!("#{}", name.trim()))
}

fn close_tag(tag: String) -> String {
    if tag.contains(' ') {
        format!("{}#", tag)
    } else {
        tag
    }
}

/// Append tags on their own line after a blank line
pub fn append_tags(text: &str, tags: &[String]) -> String {
    if tags.is_empty() {
        format!("{}\n", text.trim())
    } else {
        format!("{}\n\n{}\n", text.trim(), tags.join(" "))
    }
}

/// Drop tag-only lines from the rendered body
///
/// One-way: the removed tags are not restored on import.
pub fn hide_tag_lines(text: &str) -> String {
    TAG_LINE_RE.replace_all(text, "\n").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_simple_tags() {
        assert_eq!(extract_tags("Plan\n#work content"), s(&["work"]));
        assert_eq!(extract_tags("#a #b/c\n#.hidden"), s(&["a", "b/c", ".hidden"]));
    }

    #[test]
    fn test_tag_must_start_a_word() {
        assert!(extract_tags("C# and x#y and http://a.b/#frag").is_empty());
    }

    #[test]
    fn test_headings_are_not_tags() {
        assert!(extract_tags("# Heading\n## Sub").is_empty());
    }

    #[test]
    fn test_multiword_tags() {
        assert_eq!(extract_tags("Note\n#two words# more"), s(&["two words"]));
        assert_eq!(extract_tags("#ab cd#"), s(&["ab cd"]));
    }

    #[test]
    fn test_simple_tag_followed_by_words_without_closing_hash() {
        assert_eq!(extract_tags("#work content #other"), s(&["work", "other"]));
    }

    #[test]
    fn test_dotted_tag_is_shortened_before_multiword_tail() {
        // Backs off to the prefix that can't begin a multi-word tag
        assert_eq!(extract_tags("#a.bc de#"), s(&["a", "a.bc de"]));
    }

    #[test]
    fn test_multiword_needs_word_start() {
        assert_eq!(extract_tags("x#ab #cd ef# "), s(&["cd ef"]));
    }

    #[test]
    fn test_destinations_example() {
        let root = Path::new("/out");
        let filter = TagFilter::new(&[], &s(&["#personal"]));
        let paths = destinations(root, "Plan", "Plan\n#work content", &filter, true);
        assert_eq!(paths, vec![root.join("Plan"), root.join("work/Plan")]);
    }

    #[test]
    fn test_destinations_without_tags_keep_primary() {
        let root = Path::new("/out");
        let paths = destinations(root, "Plan", "Plan\nno tags", &TagFilter::default(), true);
        assert_eq!(paths, vec![root.join("Plan")]);
    }

    #[test]
    fn test_excluded_tag_vetoes_note() {
        let root = Path::new("/out");
        let filter = TagFilter::new(&[], &s(&["personal"]));
        assert!(destinations(root, "Diary", "Diary\n#work #personal/2024", &filter, true).is_empty());
        assert!(destinations(root, "Diary", "Diary\n#Personal", &filter, false).is_empty());
    }

    #[test]
    fn test_only_export_restricts_folders() {
        let root = Path::new("/out");
        let filter = TagFilter::new(&s(&["proj"]), &[]);
        let paths = destinations(root, "N", "N\n#project/x #misc", &filter, true);
        assert_eq!(paths, vec![root.join("N"), root.join("project/x/N")]);
    }

    #[test]
    fn test_dotted_tag_maps_to_underscore_folder() {
        let root = Path::new("/out");
        let paths = destinations(root, "N", "N\n#.inbox", &TagFilter::default(), true);
        assert_eq!(paths, vec![root.join("N"), root.join("_inbox/N")]);
    }

    #[test]
    fn test_tag_cannot_escape_root() {
        let root = Path::new("/out");
        let paths = destinations(root, "N", "N\n#../../etc", &TagFilter::default(), true);
        assert_eq!(paths, vec![root.join("N"), root.join("etc/N")]);
    }

    #[test]
    fn test_tag_folders_off_only_primary() {
        let root = Path::new("/out");
        let paths = destinations(root, "N", "N\n#work", &TagFilter::default(), false);
        assert_eq!(paths, vec![root.join("N")]);
    }

    #[test]
    fn test_tag_from_path() {
        assert_eq!(tag_from_path(Path::new("Note.md")), None);
        assert_eq!(tag_from_path(Path::new("work/sub/Note.md")).as_deref(), Some("#work/sub"));
        assert_eq!(tag_from_path(Path::new("_inbox/Note.md")).as_deref(), Some("#.inbox"));
        assert_eq!(
            tag_from_path(Path::new("my stuff/Note.textbundle/text.md")).as_deref(),
            Some("#my stuff#")
        );
        assert_eq!(tag_from_path(Path::new("Note.textbundle/text.md")), None);
    }

    #[test]
    fn test_append_tags() {
        assert_eq!(
            append_tags("  Note\nbody\n\n", &s(&["#work", "#a b#"])),
            "Note\nbody\n\n#work #a b#\n"
        );
        assert_eq!(append_tags("Note\n", &[]), "Note\n");
    }

    #[test]
    fn test_hide_tag_lines() {
        let text = "Plan\n#work #home\n## Heading\nbody";
        assert_eq!(hide_tag_lines(text), "Plan\n\n## Heading\nbody");
    }
}
