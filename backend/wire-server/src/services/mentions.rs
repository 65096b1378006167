//! Mention extraction
//!
//! Pulls `@handle` references out of post content for notification fan-in.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static MENTION_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@([a-zA-Z0-9_]+)").expect("invalid mention regex"));

/// Extract mentioned handles, lowercased, deduplicated in first-seen order.
pub fn extract_mentions(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    MENTION_REGEX
        .captures_iter(content)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_lowercase()))
        .filter(|handle| seen.insert(handle.clone()))
        .collect()
}
