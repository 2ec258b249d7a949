//! Denylist classifier for shell commands.
//!
//! A match marks a command as dangerous. It escalates the confirmation
//! prompt; it never blocks execution and never approves anything.

use regex::{Regex, RegexBuilder};
use std::sync::OnceLock;

/// Named denylist patterns, matched case-insensitively.
const DENYLIST: &[(&str, &str)] = &[
    ("recursive delete of an absolute path", r"\brm\s+-(?:rf|fr)\s+/"),
    ("recursive delete of everything", r"\brm\s+-(?:rf|fr)\s+\*"),
    ("privileged delete", r"\bsudo\s+rm\b"),
    ("world-writable permissions", r"\bchmod\s+(?:-R\s+)?0?777\b"),
    ("filesystem format", r"\bmkfs"),
    ("partition table edit", r"\bfdisk\b"),
    ("raw block device copy", r"\bdd\s+if="),
    ("write to block device", r">>?\s*/dev/(?:sd|hd|nvme|disk|mmcblk)"),
    ("fork bomb", r":\(\)\s*\{.*:\s*\|\s*:"),
];

/// Result of classifying one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Safety {
    pub dangerous: bool,
    /// Name of the first denylist entry that matched.
    pub matched: Option<&'static str>,
}

fn patterns() -> &'static [(&'static str, Regex)] {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        DENYLIST
            .iter()
            .map(|(name, pattern)| {
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .dot_matches_new_line(true)
                    .build()
                    .expect("denylist pattern must compile");
                (*name, regex)
            })
            .collect()
    })
}

/// Classify a command against the denylist.
pub fn classify(command: &str) -> Safety {
    for (name, regex) in patterns() {
        if regex.is_match(command) {
            return Safety {
                dangerous: true,
                matched: Some(name),
            };
        }
    }
    Safety {
        dangerous: false,
        matched: None,
    }
}
