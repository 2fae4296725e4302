//! Comment noise filtering
//!
//! Mentions (`@name`) and bracketed emoticons (`[doge]`) carry no opinion.
//! A comment with fewer than two characters left after stripping them is noise.

use regex_lite::Regex;
use std::sync::OnceLock;

/// Minimum characters a cleaned comment must keep
pub const MIN_CONTENT_CHARS: usize = 2;

fn noise_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"@[^ ]+|\[[^\]]+\]").ok())
        .as_ref()
}

/// Strip mentions and emoticon tokens, then trim
pub fn clean_text(raw: &str) -> String {
    match noise_pattern() {
        Some(re) => re.replace_all(raw, "").trim().to_string(),
        None => raw.trim().to_string(),
    }
}

/// Cleaned text, or `None` when the comment is noise
pub fn clean_or_discard(raw: &str) -> Option<String> {
    let cleaned = clean_text(raw);
    (cleaned.chars().count() >= MIN_CONTENT_CHARS).then_some(cleaned)
}

pub fn is_noise(raw: &str) -> bool {
    clean_or_discard(raw).is_none()
}
