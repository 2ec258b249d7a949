//! Hybrid parser turning assistant output into an ordered batch of actions.
//!
//! Three encodings are tried in order:
//! 1. native tool calls (structured output from the model API);
//! 2. delimited tags (`<file_edit>`, `<bash_command>`, ...) in the text;
//! 3. a single embedded JSON action object, only when no tags were found.
//!
//! Parsing never fails. Fragments that do not decode are logged and dropped.

mod clean;
mod error;
pub mod json;
pub mod safety;
pub mod tags;
pub mod tool_calls;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::actions::Action;

pub use clean::strip_reasoning;
pub use error::DecodeError;

/// Parser policy knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserOptions {
    /// When set, commands that do not match the denylist are marked as not
    /// requiring confirmation. Off by default.
    pub auto_run_safe_commands: bool,
}

/// One block of a structured assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
}

/// Raw assistant output as received from a model backend.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantOutput {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Deserialize)]
struct ContentEnvelope {
    content: Vec<ContentBlock>,
}

impl AssistantOutput {
    /// Interpret a raw string: a JSON content-block list (bare or under a
    /// `content` key) is treated as structured output, anything else as text.
    pub fn detect(raw: &str) -> Self {
        let trimmed = raw.trim_start();
        if trimmed.starts_with('[') {
            if let Ok(blocks) = serde_json::from_str::<Vec<ContentBlock>>(raw) {
                if !blocks.is_empty() {
                    return AssistantOutput::Blocks(blocks);
                }
            }
        } else if trimmed.starts_with('{') {
            if let Ok(envelope) = serde_json::from_str::<ContentEnvelope>(raw) {
                return AssistantOutput::Blocks(envelope.content);
            }
        }
        AssistantOutput::Text(raw.to_string())
    }

    /// Concatenated text content, tool calls excluded.
    pub fn text(&self) -> String {
        match self {
            AssistantOutput::Text(text) => text.clone(),
            AssistantOutput::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    ContentBlock::ToolUse { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<String> for AssistantOutput {
    fn from(text: String) -> Self {
        AssistantOutput::Text(text)
    }
}

impl From<&str> for AssistantOutput {
    fn from(text: &str) -> Self {
        AssistantOutput::Text(text.to_string())
    }
}

/// Hybrid parser for the three action encodings.
#[derive(Debug, Clone, Default)]
pub struct HybridParser {
    options: ParserOptions,
}

impl HybridParser {
    pub fn new(options: ParserOptions) -> Self {
        Self { options }
    }

    /// Parse assistant output into actions in order of appearance.
    pub fn parse(&self, output: &AssistantOutput) -> Vec<Action> {
        let actions = match output {
            AssistantOutput::Blocks(blocks) => self.parse_blocks(blocks),
            AssistantOutput::Text(text) => self.parse_text(text),
        };
        debug!("Parsed {} action(s)", actions.len());
        actions
    }

    /// Parse plain text: tags first, then a single embedded JSON object.
    pub fn parse_text(&self, text: &str) -> Vec<Action> {
        let cleaned = strip_reasoning(text);
        let scan = tags::scan(&cleaned, &self.options);
        if scan.fragments > 0 {
            return scan.actions;
        }
        json::scan(&cleaned, &self.options)
    }

    fn parse_blocks(&self, blocks: &[ContentBlock]) -> Vec<Action> {
        let mut actions = Vec::new();
        for block in blocks {
            match block {
                ContentBlock::ToolUse { id, name, input } => {
                    match tool_calls::decode_tool_call(name, input, &self.options) {
                        Ok(action) => actions.push(action),
                        Err(DecodeError::UnknownTool(name)) => {
                            warn!("Skipping call {} to unknown tool `{}`", id, name)
                        }
                        Err(e) => warn!("Skipping malformed tool call {}: {}", id, e),
                    }
                }
                ContentBlock::Text { text } => {
                    let cleaned = strip_reasoning(text);
                    actions.extend(tags::scan(&cleaned, &self.options).actions);
                }
            }
        }
        actions
    }
}
