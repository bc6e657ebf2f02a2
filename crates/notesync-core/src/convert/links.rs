//! Image link syntaxes found in note bodies

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use uuid::Uuid;

/// `![alt](url)`
pub static MD_IMAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[(.*?)\]\(([^)]+)\)").expect("valid image regex"));

/// `![[file.png]]`
pub static WIKI_IMAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[\[(.*?)\]\]").expect("valid wiki image regex"));

/// Pre-markdown store syntax `[image:ID/file.png]`
pub static LEGACY_IMAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[image:([^\]/]+)/([^\]]+)\]").expect("valid legacy image regex"));

/// `[key]: url "title"` reference definitions
static REF_DEF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\[([^\]]+)\]:\s*(\S+).*$\n?").expect("valid reference definition regex")
});

/// `![alt][key]`
static REF_IMAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[([^\]]*)\]\[([^\]]+)\]").expect("valid reference image regex"));

/// `![key]`, only when not followed by `(`
static REF_IMPLICIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[([^\[\]]+)\]").expect("valid implicit reference regex"));

/// Bundle asset link with its identifier prefix, plus an optional title
static BUNDLE_ASSET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"!\[(.*?)\]\(assets/.+?_(.+?)( ".+?")?\) ?"#).expect("valid bundle asset regex")
});

/// Link targets that point off the machine
pub fn is_remote(url: &str) -> bool {
    url.starts_with("http")
}

/// Keys of the form `//` are the identity marker, not a reference
fn is_marker_key(key: &str) -> bool {
    key.starts_with("//")
}

/// Inline every reference-style image and drop the definitions
///
/// Text without any reference definitions is returned unchanged.
pub fn inline_reference_links(text: &str) -> String {
    let refs: HashMap<String, String> = REF_DEF_RE
        .captures_iter(text)
        .filter(|caps| !is_marker_key(&caps[1]))
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
        .collect();
    if refs.is_empty() {
        return text.to_string();
    }
    let url_for = |key: &str| refs.get(key).cloned().unwrap_or_else(|| key.to_string());

    let text = REF_IMAGE_RE.replace_all(text, |caps: &Captures| {
        format!("![{}]({})", &caps[1], url_for(&caps[2]))
    });

    let mut inlined = String::with_capacity(text.len());
    let mut last = 0;
    for caps in REF_IMPLICIT_RE.captures_iter(&text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if text[whole.end()..].starts_with('(') {
            continue;
        }
        inlined.push_str(&text[last..whole.start()]);
        inlined.push_str(&format!("![{}]({})", &caps[1], url_for(&caps[1])));
        last = whole.end();
    }
    inlined.push_str(&text[last..]);

    REF_DEF_RE
        .replace_all(&inlined, |caps: &Captures| {
            if is_marker_key(&caps[1]) {
                caps[0].to_string()
            } else {
                String::new()
            }
        })
        .into_owned()
}

/// Turn repository asset links `![a](<rel_assets>/ID/file)` back into `![a](file)`
pub fn restore_repository_links(text: &str, rel_assets: &str) -> String {
    let pattern = format!(r"!\[(.*?)\]\({}/(.+?)/(.+?)\)", regex::escape(rel_assets));
    match Regex::new(&pattern) {
        Ok(re) => re.replace_all(text, "![$1]($3)").into_owned(),
        Err(_) => text.to_string(),
    }
}

/// Turn bundle asset links `![a](assets/ID_file "t")` back into `![a](file)`
pub fn restore_bundle_links(text: &str) -> String {
    BUNDLE_ASSET_RE.replace_all(text, "![$1]($2)").into_owned()
}

/// Whether `name` starts with an identifier followed by `_`
pub fn has_identifier_prefix(name: &str) -> bool {
    name.get(..36).map_or(false, is_identifier) && name[36..].starts_with('_')
}

/// `name` with a leading `<identifier>_` removed
pub fn strip_identifier_prefix(name: &str) -> &str {
    if has_identifier_prefix(name) {
        &name[37..]
    } else {
        name
    }
}

fn is_identifier(value: &str) -> bool {
    value.len() == 36 && Uuid::try_parse(value).is_ok()
}

/// Whether a link target already lives in store-managed asset storage
///
/// That is either a directory named by an identifier (`.../<ID>/file.png`)
/// or a bundle asset carrying an identifier prefix (`assets/<ID>_file.png`).
pub fn is_store_managed(url: &str) -> bool {
    let segments: Vec<&str> = url.split('/').collect();
    let Some((file, folders)) = segments.split_last() else {
        return false;
    };
    if folders.iter().any(|segment| is_identifier(segment)) {
        return true;
    }
    folders.last() == Some(&"assets") && has_identifier_prefix(file)
}
