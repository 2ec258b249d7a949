use crate::rpc::protocol::ContextFile;

/// Instructions describing the action tags the parser understands.
pub const SYSTEM_PROMPT: &str = r#"You are a coding assistant working inside the user's project.

When suggesting code changes, use this format:

<file_edit path="relative/path/to/file.py" type="modify" description="Brief description">
```python
# Complete updated file content
```
</file_edit>

Rules:
1. Use paths relative to the project root
2. Types: modify (edit existing), create (new file), delete (remove file)
3. Include the complete file content, not just snippets
4. Add clear descriptions
5. Multiple edits = multiple <file_edit> tags

To run a shell command, use:
<bash_command description="Run the tests">pytest -q</bash_command>

To read a file before changing it, use:
<read_file path="setup.py"/>

Every edit and command is shown to the user for approval before it runs.
"#;

/// Prefix the user's message with any attached files.
pub fn user_message(message: &str, context: &[ContextFile]) -> String {
    if context.is_empty() {
        return message.to_string();
    }
    let files: Vec<String> = context
        .iter()
        .map(|file| format!("File: {}\n```\n{}\n```", file.path, file.content))
        .collect();
    format!("{}\n\n{}", files.join("\n\n"), message)
}
