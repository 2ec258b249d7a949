//! Executable actions extracted from assistant output.
//!
//! An [`Action`] is a closed set of variants. The parser produces them, the
//! executor pattern-matches on them, and the RPC layer ships them as JSON
//! objects tagged by `action_type`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::parser::safety;

/// Kind of change a [`CodeEdit`] makes to its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditType {
    Create,
    #[default]
    Modify,
    Delete,
}

impl EditType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditType::Create => "create",
            EditType::Modify => "modify",
            EditType::Delete => "delete",
        }
    }
}

impl fmt::Display for EditType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EditType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" | "new" => Ok(EditType::Create),
            "modify" | "edit" | "update" => Ok(EditType::Modify),
            "delete" | "remove" => Ok(EditType::Delete),
            other => Err(other.to_string()),
        }
    }
}

/// Discriminator for [`Action`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    CodeEdit,
    BashCommand,
    FileRead,
    FileWrite,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::CodeEdit => "code_edit",
            ActionKind::BashCommand => "bash",
            ActionKind::FileRead => "file_read",
            ActionKind::FileWrite => "file_write",
        }
    }
}

/// Whole-file edit proposed by the assistant. Always requires confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeEdit {
    pub file_path: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub edit_type: EditType,
    #[serde(default)]
    pub description: String,
}

/// Shell command proposed by the assistant.
///
/// `dangerous` records whether the command matched the denylist;
/// `requires_confirmation` is derived from it and the auto-run policy when
/// the command is constructed and has no setter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BashCommand {
    command: String,
    #[serde(default)]
    description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    working_dir: Option<String>,
    #[serde(default)]
    dangerous: bool,
    #[serde(default = "default_true")]
    requires_confirmation: bool,
}

fn default_true() -> bool {
    true
}

impl BashCommand {
    /// Build a command, classifying it against the denylist.
    ///
    /// With `auto_run_safe` unset every command requires confirmation; the
    /// denylist only escalates, it never approves.
    pub fn new(
        command: impl Into<String>,
        description: impl Into<String>,
        working_dir: Option<String>,
        auto_run_safe: bool,
    ) -> Self {
        let command = command.into();
        let dangerous = safety::classify(&command).dangerous;
        Self {
            command,
            description: description.into(),
            working_dir,
            dangerous,
            requires_confirmation: dangerous || !auto_run_safe,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn working_dir(&self) -> Option<&str> {
        self.working_dir.as_deref()
    }

    /// True when the command matched a denylist pattern.
    pub fn is_dangerous(&self) -> bool {
        self.dangerous
    }

    pub fn requires_confirmation(&self) -> bool {
        self.requires_confirmation
    }
}

/// Read a file relative to the working directory. Never requires confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRead {
    pub file_path: String,
    #[serde(default)]
    pub description: String,
}

/// Write full content to a file. Always requires confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileWrite {
    pub file_path: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub description: String,
}

/// One executable unit derived from assistant output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum Action {
    CodeEdit(CodeEdit),
    #[serde(rename = "bash")]
    BashCommand(BashCommand),
    FileRead(FileRead),
    FileWrite(FileWrite),
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::CodeEdit(_) => ActionKind::CodeEdit,
            Action::BashCommand(_) => ActionKind::BashCommand,
            Action::FileRead(_) => ActionKind::FileRead,
            Action::FileWrite(_) => ActionKind::FileWrite,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Action::CodeEdit(edit) => &edit.description,
            Action::BashCommand(cmd) => cmd.description(),
            Action::FileRead(read) => &read.description,
            Action::FileWrite(write) => &write.description,
        }
    }

    pub fn requires_confirmation(&self) -> bool {
        match self {
            Action::CodeEdit(_) | Action::FileWrite(_) => true,
            Action::BashCommand(cmd) => cmd.requires_confirmation(),
            Action::FileRead(_) => false,
        }
    }

    /// Target file for file-oriented actions.
    pub fn file_path(&self) -> Option<&str> {
        match self {
            Action::CodeEdit(edit) => Some(&edit.file_path),
            Action::FileRead(read) => Some(&read.file_path),
            Action::FileWrite(write) => Some(&write.file_path),
            Action::BashCommand(_) => None,
        }
    }

    /// One-line label used in logs and prompts.
    pub fn label(&self) -> String {
        match self {
            Action::CodeEdit(edit) => format!("{} {}", edit.edit_type, edit.file_path),
            Action::BashCommand(cmd) => format!("$ {}", cmd.command()),
            Action::FileRead(read) => format!("read {}", read.file_path),
            Action::FileWrite(write) => format!("write {}", write.file_path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_flags_per_kind() {
        let edit = Action::CodeEdit(CodeEdit {
            file_path: "a.py".to_string(),
            content: String::new(),
            edit_type: EditType::Create,
            description: String::new(),
        });
        let read = Action::FileRead(FileRead {
            file_path: "a.py".to_string(),
            description: String::new(),
        });
        let write = Action::FileWrite(FileWrite {
            file_path: "a.py".to_string(),
            content: "x".to_string(),
            description: String::new(),
        });

        assert!(edit.requires_confirmation());
        assert!(!read.requires_confirmation());
        assert!(write.requires_confirmation());
    }

    #[test]
    fn test_bash_confirmation_policy() {
        let safe = BashCommand::new("ls -la", "", None, false);
        assert!(!safe.is_dangerous());
        assert!(safe.requires_confirmation());

        let auto = BashCommand::new("ls -la", "", None, true);
        assert!(!auto.requires_confirmation());

        let dangerous = BashCommand::new("sudo rm -rf /var", "", None, true);
        assert!(dangerous.is_dangerous());
        assert!(dangerous.requires_confirmation());
    }

    #[test]
    fn test_action_serializes_with_kind_tag() {
        let action = Action::BashCommand(BashCommand::new("echo hi", "greet", None, false));
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action_type"], "bash");
        assert_eq!(json["command"], "echo hi");
        assert_eq!(json["requires_confirmation"], true);

        let edit = Action::CodeEdit(CodeEdit {
            file_path: "src/lib.rs".to_string(),
            content: "fn main() {}".to_string(),
            edit_type: EditType::Delete,
            description: "drop it".to_string(),
        });
        let json = serde_json::to_value(&edit).unwrap();
        assert_eq!(json["action_type"], "code_edit");
        assert_eq!(json["edit_type"], "delete");

        let back: Action = serde_json::from_value(json).unwrap();
        assert_eq!(back, edit);
    }

    #[test]
    fn test_edit_type_from_str() {
        assert_eq!("create".parse::<EditType>(), Ok(EditType::Create));
        assert_eq!(" Modify ".parse::<EditType>(), Ok(EditType::Modify));
        assert_eq!("DELETE".parse::<EditType>(), Ok(EditType::Delete));
        assert!("rename".parse::<EditType>().is_err());
    }
}
