//! Decoding of native tool calls into actions.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::error::DecodeError;
use super::ParserOptions;
use crate::actions::{Action, BashCommand, CodeEdit, EditType, FileRead, FileWrite};

/// Tools the assistant may call, with the aliases older prompts used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolName {
    EditFile,
    RunCommand,
    ReadFile,
    WriteFile,
}

impl ToolName {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "edit_file" | "code_edit" => Some(ToolName::EditFile),
            "run_command" | "bash" | "execute_command" => Some(ToolName::RunCommand),
            "read_file" | "file_read" => Some(ToolName::ReadFile),
            "write_file" | "file_write" => Some(ToolName::WriteFile),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EditFileInput {
    #[serde(alias = "path")]
    file_path: String,
    #[serde(default, alias = "new_content")]
    content: String,
    #[serde(default)]
    edit_type: Option<String>,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct RunCommandInput {
    command: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    working_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReadFileInput {
    #[serde(alias = "path")]
    file_path: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct WriteFileInput {
    #[serde(alias = "path")]
    file_path: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    description: String,
}

fn decode_input<T: DeserializeOwned>(tool: &str, input: &Value) -> Result<T, DecodeError> {
    serde_json::from_value(input.clone()).map_err(|source| DecodeError::InvalidInput {
        tool: tool.to_string(),
        source,
    })
}

fn require_path(path: String) -> Result<String, DecodeError> {
    let path = path.trim().to_string();
    if path.is_empty() {
        return Err(DecodeError::EmptyPath);
    }
    Ok(path)
}

/// Decode one tool call by name into an action.
pub fn decode_tool_call(
    name: &str,
    input: &Value,
    options: &ParserOptions,
) -> Result<Action, DecodeError> {
    let tool = ToolName::from_name(name).ok_or_else(|| DecodeError::UnknownTool(name.to_string()))?;
    decode_for_tool(tool, name, input, options)
}

pub(super) fn decode_for_tool(
    tool: ToolName,
    name: &str,
    input: &Value,
    options: &ParserOptions,
) -> Result<Action, DecodeError> {
    match tool {
        ToolName::EditFile => {
            let input: EditFileInput = decode_input(name, input)?;
            let edit_type = match input.edit_type.as_deref() {
                None | Some("") => EditType::default(),
                Some(raw) => raw
                    .parse::<EditType>()
                    .map_err(DecodeError::UnknownEditType)?,
            };
            Ok(Action::CodeEdit(CodeEdit {
                file_path: require_path(input.file_path)?,
                content: input.content,
                edit_type,
                description: input.description,
            }))
        }
        ToolName::RunCommand => {
            let input: RunCommandInput = decode_input(name, input)?;
            let command = input.command.trim();
            if command.is_empty() {
                return Err(DecodeError::EmptyCommand);
            }
            Ok(Action::BashCommand(BashCommand::new(
                command,
                input.description,
                input.working_dir.filter(|dir| !dir.trim().is_empty()),
                options.auto_run_safe_commands,
            )))
        }
        ToolName::ReadFile => {
            let input: ReadFileInput = decode_input(name, input)?;
            Ok(Action::FileRead(FileRead {
                file_path: require_path(input.file_path)?,
                description: input.description,
            }))
        }
        ToolName::WriteFile => {
            let input: WriteFileInput = decode_input(name, input)?;
            Ok(Action::FileWrite(FileWrite {
                file_path: require_path(input.file_path)?,
                content: input.content,
                description: input.description,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_edit_file() {
        let action = decode_tool_call(
            "edit_file",
            &json!({"file_path": "src/a.rs", "content": "x", "edit_type": "create"}),
            &ParserOptions::default(),
        )
        .unwrap();
        match action {
            Action::CodeEdit(edit) => {
                assert_eq!(edit.file_path, "src/a.rs");
                assert_eq!(edit.edit_type, EditType::Create);
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn test_decode_accepts_path_alias() {
        let action = decode_tool_call(
            "read_file",
            &json!({"path": "README.md"}),
            &ParserOptions::default(),
        )
        .unwrap();
        assert_eq!(action.file_path(), Some("README.md"));
    }

    #[test]
    fn test_decode_errors() {
        let options = ParserOptions::default();
        assert!(matches!(
            decode_tool_call("browse", &json!({}), &options),
            Err(DecodeError::UnknownTool(name)) if name == "browse"
        ));
        assert!(matches!(
            decode_tool_call("run_command", &json!({"command": "  "}), &options),
            Err(DecodeError::EmptyCommand)
        ));
        assert!(matches!(
            decode_tool_call("write_file", &json!({"content": "x"}), &options),
            Err(DecodeError::InvalidInput { .. })
        ));
        assert!(matches!(
            decode_tool_call(
                "edit_file",
                &json!({"file_path": "a", "edit_type": "rename"}),
                &options
            ),
            Err(DecodeError::UnknownEditType(_))
        ));
    }
}
