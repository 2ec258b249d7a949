//! Text rendering for pending edits and their diffs.

use diff::Result as DiffLine;
use std::fmt;

use super::PendingEdit;
use crate::actions::EditType;

/// Diffs longer than this are cut off when displayed.
const MAX_DIFF_LINES: usize = 400;

/// Numbered list of proposed edits with the reply instructions.
pub fn format_summary<'a>(edits: impl IntoIterator<Item = (usize, &'a PendingEdit)>) -> String {
    let mut lines = Vec::new();
    for (index, edit) in edits {
        lines.push(format!("{}. {}", index, edit.file_path));
        if !edit.description.is_empty() {
            lines.push(format!("   └─ {}", edit.description));
        }
        lines.push(format!("   └─ Type: {}", edit.edit_type));
    }

    if lines.is_empty() {
        return "No code edits found.".to_string();
    }

    let mut out = String::from("\n📝 Proposed Code Changes:\n\n");
    out.push_str(&lines.join("\n"));
    out.push_str("\n\nTo apply changes:\n");
    out.push_str("  - Type the number to apply that change\n");
    out.push_str("  - Type 'all' to apply all changes\n");
    out.push_str("  - Type 'skip' to skip");
    out
}

/// One pending edit opened for review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffView {
    pub index: usize,
    pub file_path: String,
    pub edit_type: EditType,
    pub description: String,
    pub original: String,
    pub proposed: String,
}

impl DiffView {
    /// Line diff between original and proposed content, `-`/`+`/` ` prefixed.
    pub fn diff_lines(&self) -> Vec<String> {
        let proposed = match self.edit_type {
            EditType::Delete => "",
            EditType::Create | EditType::Modify => self.proposed.as_str(),
        };
        diff::lines(&self.original, proposed)
            .into_iter()
            .map(|line| match line {
                DiffLine::Left(l) => format!("-{}", l),
                DiffLine::Right(r) => format!("+{}", r),
                DiffLine::Both(l, _) => format!(" {}", l),
            })
            .collect()
    }

    /// Number of added and removed lines.
    pub fn stats(&self) -> (usize, usize) {
        self.diff_lines()
            .iter()
            .fold((0, 0), |(added, removed), line| match line.chars().next() {
                Some('+') => (added + 1, removed),
                Some('-') => (added, removed + 1),
                _ => (added, removed),
            })
    }
}

impl fmt::Display for DiffView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[{}] {} ({})", self.index, self.file_path, self.edit_type)?;
        if !self.description.is_empty() {
            writeln!(f, "    {}", self.description)?;
        }
        writeln!(f, "--- a/{}", self.file_path)?;
        writeln!(f, "+++ b/{}", self.file_path)?;

        let lines = self.diff_lines();
        for line in lines.iter().take(MAX_DIFF_LINES) {
            writeln!(f, "{}", line)?;
        }
        if lines.len() > MAX_DIFF_LINES {
            writeln!(f, "... {} more line(s)", lines.len() - MAX_DIFF_LINES)?;
        }
        Ok(())
    }
}
