use serde_json::{json, Value};

/// Function definitions for the tools the parser decodes, in the OpenAI
/// `tools` format.
pub fn tool_definitions() -> Value {
    json!([
        function(
            "edit_file",
            "Create, modify or delete a file. Provide the complete new content.",
            json!({
                "file_path": {"type": "string", "description": "Path relative to the project root"},
                "content": {"type": "string", "description": "Complete file content"},
                "edit_type": {"type": "string", "enum": ["create", "modify", "delete"]},
                "description": {"type": "string"}
            }),
            &["file_path", "content"],
        ),
        function(
            "run_command",
            "Run a shell command in the project directory. The user approves it first.",
            json!({
                "command": {"type": "string"},
                "description": {"type": "string"},
                "working_dir": {"type": "string", "description": "Subdirectory to run in"}
            }),
            &["command"],
        ),
        function(
            "read_file",
            "Read a file from the project.",
            json!({
                "file_path": {"type": "string"},
                "description": {"type": "string"}
            }),
            &["file_path"],
        ),
        function(
            "write_file",
            "Write content to a file, replacing it.",
            json!({
                "file_path": {"type": "string"},
                "content": {"type": "string"},
                "description": {"type": "string"}
            }),
            &["file_path", "content"],
        ),
    ])
}

fn function(name: &str, description: &str, properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": {
                "type": "object",
                "properties": properties,
                "required": required
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::tool_calls::ToolName;

    #[test]
    fn test_every_definition_decodes() {
        let definitions = tool_definitions();
        let names: Vec<&str> = definitions
            .as_array()
            .unwrap()
            .iter()
            .map(|tool| tool["function"]["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["edit_file", "run_command", "read_file", "write_file"]);
        assert!(names.iter().all(|name| ToolName::from_name(name).is_some()));
    }
}
