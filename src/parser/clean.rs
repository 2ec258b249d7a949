//! Removal of reasoning blocks some models interleave with their answer.

use regex::{Regex, RegexBuilder};
use std::sync::OnceLock;
use tracing::debug;

const REASONING_TAGS: &[&str] = &["think", "thinking", "reflection"];

fn reasoning_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        REASONING_TAGS
            .iter()
            .map(|tag| {
                RegexBuilder::new(&format!(r"<{tag}>.*?</{tag}>"))
                    .case_insensitive(true)
                    .dot_matches_new_line(true)
                    .build()
                    .expect("reasoning pattern must compile")
            })
            .collect()
    })
}

/// Strip `<think>`-style blocks so tags quoted inside them are never executed.
pub fn strip_reasoning(text: &str) -> String {
    let mut cleaned = text.to_string();
    for regex in reasoning_patterns() {
        if regex.is_match(&cleaned) {
            debug!("Removing reasoning block matching {}", regex.as_str());
            cleaned = regex.replace_all(&cleaned, "").into_owned();
        }
    }
    cleaned
}
