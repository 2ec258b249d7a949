//! Delimited tag format.
//!
//! ```text
//! <file_edit path="src/main.py" type="modify" description="Fix bug">
//! ```python
//! print("hi")
//! ```
//! </file_edit>
//!
//! <bash_command description="Run tests">pytest -q</bash_command>
//! <read_file path="setup.py"/>
//! <write_file path="notes.txt" description="Notes">
//! ```
//! text
//! ```
//! </write_file>
//! ```

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{debug, warn};

use super::error::DecodeError;
use super::ParserOptions;
use crate::actions::{Action, BashCommand, CodeEdit, EditType, FileRead, FileWrite};

/// Quoted attributes: `name="value"` or `name='value'`.
const ATTRS: &str = r#"((?:\s+[\w-]+\s*=\s*(?:"[^"]*"|'[^']*'))*)"#;

struct TagPatterns {
    file_edit: Regex,
    write_file: Regex,
    bash_command: Regex,
    read_file: Regex,
    attribute: Regex,
    fence: Regex,
}

fn patterns() -> &'static TagPatterns {
    static PATTERNS: OnceLock<TagPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let paired = |tag: &str| {
            Regex::new(&format!(r"(?s)<{tag}{ATTRS}\s*>(.*?)</{tag}\s*>"))
                .expect("tag pattern must compile")
        };
        TagPatterns {
            file_edit: paired("file_edit"),
            write_file: paired("write_file"),
            bash_command: paired("bash_command"),
            read_file: Regex::new(&format!(r"<read_file{ATTRS}\s*/?>"))
                .expect("tag pattern must compile"),
            attribute: Regex::new(r#"([\w-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
                .expect("attribute pattern must compile"),
            fence: Regex::new(r"(?s)\A\s*```[^\n]*\n(.*?)\n?[ \t]*```\s*\z")
                .expect("fence pattern must compile"),
        }
    })
}

/// Outcome of scanning text for tags.
#[derive(Debug, Default)]
pub struct TagScan {
    /// Decoded actions in textual order.
    pub actions: Vec<Action>,
    /// Number of tag occurrences seen, including ones that failed to decode.
    pub fragments: usize,
}

fn parse_attributes(raw: &str) -> HashMap<String, String> {
    patterns()
        .attribute
        .captures_iter(raw)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_ascii_lowercase();
            let value = caps.get(2).or_else(|| caps.get(3))?.as_str().to_string();
            Some((name, value))
        })
        .collect()
}

fn required(
    attrs: &HashMap<String, String>,
    tag: &'static str,
    attribute: &'static str,
) -> Result<String, DecodeError> {
    attrs
        .get(attribute)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or(DecodeError::MissingAttribute { tag, attribute })
}

/// Extract the inner code of a fenced block, without fence markers.
pub fn fenced_content(body: &str) -> Option<String> {
    patterns()
        .fence
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim_end_matches('\r').to_string())
}

/// Decode a `<file_edit>` tag from its raw attribute string and body.
pub fn decode_file_edit(attrs: &str, body: &str) -> Result<CodeEdit, DecodeError> {
    let attrs = parse_attributes(attrs);
    let file_path = required(&attrs, "file_edit", "path")?;
    let edit_type = match attrs.get("type").map(|t| t.trim()) {
        None | Some("") => EditType::default(),
        Some(raw) => raw
            .parse::<EditType>()
            .map_err(DecodeError::UnknownEditType)?,
    };
    // Deletions need no body.
    let content = match fenced_content(body) {
        Some(content) => content,
        None if edit_type == EditType::Delete => String::new(),
        None => {
            return Err(DecodeError::MissingFence {
                tag: "file_edit",
                path: file_path,
            })
        }
    };
    Ok(CodeEdit {
        file_path,
        content,
        edit_type,
        description: attrs.get("description").cloned().unwrap_or_default(),
    })
}

/// Decode a `<write_file>` tag.
pub fn decode_write_file(attrs: &str, body: &str) -> Result<FileWrite, DecodeError> {
    let attrs = parse_attributes(attrs);
    let file_path = required(&attrs, "write_file", "path")?;
    let content = fenced_content(body).ok_or_else(|| DecodeError::MissingFence {
        tag: "write_file",
        path: file_path.clone(),
    })?;
    Ok(FileWrite {
        file_path,
        content,
        description: attrs.get("description").cloned().unwrap_or_default(),
    })
}

/// Decode a `<bash_command>` tag.
pub fn decode_bash_command(
    attrs: &str,
    body: &str,
    options: &ParserOptions,
) -> Result<BashCommand, DecodeError> {
    let attrs = parse_attributes(attrs);
    let command = body.trim();
    if command.is_empty() {
        return Err(DecodeError::EmptyCommand);
    }
    Ok(BashCommand::new(
        command,
        attrs.get("description").cloned().unwrap_or_default(),
        attrs
            .get("working_dir")
            .or_else(|| attrs.get("cwd"))
            .cloned()
            .filter(|dir| !dir.trim().is_empty()),
        options.auto_run_safe_commands,
    ))
}

/// Decode a `<read_file/>` tag.
pub fn decode_read_file(attrs: &str) -> Result<FileRead, DecodeError> {
    let attrs = parse_attributes(attrs);
    let file_path = required(&attrs, "read_file", "path")?;
    let description = attrs
        .get("description")
        .cloned()
        .unwrap_or_else(|| format!("Read {}", file_path));
    Ok(FileRead {
        file_path,
        description,
    })
}

/// Scan text for every supported tag and return actions in textual order.
pub fn scan(text: &str, options: &ParserOptions) -> TagScan {
    let patterns = patterns();
    let mut found: Vec<(usize, usize, Result<Action, DecodeError>)> = Vec::new();

    for caps in patterns.file_edit.captures_iter(text) {
        let (start, end) = caps.get(0).map_or((0, 0), |m| (m.start(), m.end()));
        let result = decode_file_edit(&caps[1], &caps[2]).map(Action::CodeEdit);
        found.push((start, end, result));
    }
    for caps in patterns.write_file.captures_iter(text) {
        let (start, end) = caps.get(0).map_or((0, 0), |m| (m.start(), m.end()));
        let result = decode_write_file(&caps[1], &caps[2]).map(Action::FileWrite);
        found.push((start, end, result));
    }
    for caps in patterns.bash_command.captures_iter(text) {
        let (start, end) = caps.get(0).map_or((0, 0), |m| (m.start(), m.end()));
        let result = decode_bash_command(&caps[1], &caps[2], options).map(Action::BashCommand);
        found.push((start, end, result));
    }
    for caps in patterns.read_file.captures_iter(text) {
        let (start, end) = caps.get(0).map_or((0, 0), |m| (m.start(), m.end()));
        let result = decode_read_file(&caps[1]).map(Action::FileRead);
        found.push((start, end, result));
    }

    found.sort_by_key(|(start, _, _)| *start);

    let mut fragments = 0;
    let mut actions = Vec::with_capacity(found.len());
    let mut covered_until = 0;
    for (start, end, result) in found {
        // Tags quoted inside another tag's body belong to that body.
        if start < covered_until {
            continue;
        }
        covered_until = end;
        fragments += 1;
        match result {
            Ok(action) => {
                debug!("Parsed {} at offset {}", action.label(), start);
                actions.push(action);
            }
            Err(e) => warn!("Dropping malformed tag at offset {}: {}", start, e),
        }
    }

    TagScan { actions, fragments }
}
