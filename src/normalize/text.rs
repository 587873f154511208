// src/normalize/text.rs
//! Cleanup for provider-supplied titles in list fields (events, alerts).

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

const MAX_CHARS: usize = 300;

static MARKUP: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?s)<[^<>]*>").ok());

/// Decode entities, drop markup, collapse whitespace (NBSP included), trim
/// trailing sentence punctuation and cap the length.
pub fn normalize_text(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s);
    let plain = match MARKUP.as_ref() {
        Some(re) => re.replace_all(&decoded, " "),
        None => Cow::Borrowed(&*decoded),
    };
    let joined = plain.split_whitespace().collect::<Vec<_>>().join(" ");
    joined
        .trim_end_matches(['!', '?', '.', ',', ';'])
        .trim_end()
        .chars()
        .take(MAX_CHARS)
        .collect()
}

/// De-duplication key: the normalized text, lowercased.
pub fn dedup_key(s: &str) -> String {
    normalize_text(s).to_lowercase()
}
