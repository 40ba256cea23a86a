//! File-name sanitization.
//!
//! Turns an arbitrary candidate string into a name every mainstream filesystem
//! accepts: reserved characters become `_`, whitespace runs collapse to one space,
//! over-long names are cut down while keeping their extension, and names that end
//! up empty are replaced by a generated, time-based one.

use chrono::{DateTime, Local};
use regex::Regex;
use std::sync::LazyLock;

/// Characters that are not allowed in file names on at least one supported platform.
pub const RESERVED_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Longest name (in characters) the sanitizer will return.
pub const MAX_NAME_CHARS: usize = 200;

/// Marker appended where a name was shortened.
pub const ELLIPSIS: &str = "...";

/// Stem characters kept when a long name with an extension is shortened.
const KEPT_STEM_CHARS: usize = 190;

static RESERVED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*]"#).expect("reserved character pattern"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern"));

/// Sanitizes `raw` using the current local time for any generated name.
///
/// # Examples
///
/// ```
/// use dlsort::sanitize::sanitize_file_name;
///
/// assert_eq!(sanitize_file_name("  what?  a   report .pdf"), "what_ a report .pdf");
/// assert_eq!(sanitize_file_name("a<b>c.txt"), "a_b_c.txt");
/// ```
pub fn sanitize_file_name(raw: &str) -> String {
    sanitize_file_name_at(raw, Local::now())
}

/// Sanitizes `raw`; `now` only feeds the fallback name, which keeps this deterministic.
pub fn sanitize_file_name_at(raw: &str, now: DateTime<Local>) -> String {
    let replaced = RESERVED.replace_all(raw, "_");
    let collapsed = WHITESPACE.replace_all(&replaced, " ");
    let name = shorten(collapsed.trim());

    if name.is_empty() || name == "." || name == ".." {
        return generated_name("archivo", now);
    }

    name
}

/// Builds `<prefix>_<unix seconds>`, the name used when nothing usable is left.
pub(crate) fn generated_name(prefix: &str, now: DateTime<Local>) -> String {
    format!("{}_{}", prefix, now.timestamp())
}

/// Returns at most the first `count` characters of `text`.
pub(crate) fn take_chars(text: &str, count: usize) -> &str {
    match text.char_indices().nth(count) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

fn shorten(name: &str) -> String {
    if name.chars().count() <= MAX_NAME_CHARS {
        return name.to_string();
    }

    if let Some((stem, extension)) = name.rsplit_once('.')
        && !stem.is_empty()
        && !extension.is_empty()
    {
        // Leave room for the marker and the dot so the result never exceeds the limit.
        let room = MAX_NAME_CHARS.saturating_sub(ELLIPSIS.len() + 1 + extension.chars().count());
        let budget = KEPT_STEM_CHARS.min(room);
        if budget > 0 {
            return format!("{}{}.{}", take_chars(stem, budget), ELLIPSIS, extension);
        }
    }

    format!(
        "{}{}",
        take_chars(name, MAX_NAME_CHARS - ELLIPSIS.len()),
        ELLIPSIS
    )
}
