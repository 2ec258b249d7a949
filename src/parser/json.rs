//! Embedded JSON action objects.
//!
//! Accepts `{"action_type": "bash", "command": "ls"}` style objects (kind in
//! `action_type` or `type`) and `{"tool": "read_file", "arguments": {...}}`
//! pairs, where `arguments` may also be a JSON-encoded string.

use serde_json::{Deserializer, Value};
use tracing::debug;

use super::error::DecodeError;
use super::tool_calls::{decode_for_tool, decode_tool_call, ToolName};
use super::ParserOptions;
use crate::actions::Action;

/// Decode one JSON value into an action.
pub fn decode_value(value: &Value, options: &ParserOptions) -> Result<Action, DecodeError> {
    let object = value.as_object().ok_or(DecodeError::NotAnAction)?;

    if let (Some(tool), Some(arguments)) = (
        object.get("tool").and_then(Value::as_str),
        object.get("arguments"),
    ) {
        let arguments = match arguments {
            Value::String(raw) => serde_json::from_str::<Value>(raw)?,
            other => other.clone(),
        };
        return decode_tool_call(tool, &arguments, options);
    }

    let (kind, from_type_key) = match object.get("action_type").and_then(Value::as_str) {
        Some(kind) => (kind, false),
        None => match object.get("type").and_then(Value::as_str) {
            Some(kind) => (kind, true),
            None => return Err(DecodeError::NotAnAction),
        },
    };
    let tool = ToolName::from_name(kind)
        .ok_or_else(|| DecodeError::UnknownActionType(kind.to_string()))?;

    let mut input = value.clone();
    if from_type_key {
        if let Some(map) = input.as_object_mut() {
            map.remove("type");
        }
    }
    decode_for_tool(tool, kind, &input, options)
}

/// Find actions encoded as JSON in free text.
///
/// A response that is entirely a JSON object or array is decoded whole.
/// Otherwise the first embedded object that decodes to an action wins.
pub fn scan(text: &str, options: &ParserOptions) -> Vec<Action> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Array(items)) => {
                return items
                    .iter()
                    .filter_map(|item| match decode_value(item, options) {
                        Ok(action) => Some(action),
                        Err(e) => {
                            debug!("Skipping JSON array item: {}", e);
                            None
                        }
                    })
                    .collect();
            }
            Ok(value) => {
                return match decode_value(&value, options) {
                    Ok(action) => vec![action],
                    Err(e) => {
                        debug!("JSON response is not an action: {}", e);
                        Vec::new()
                    }
                };
            }
            Err(e) => debug!("Response looks like JSON but does not decode: {}", e),
        }
    }

    let mut offset = 0;
    while let Some(pos) = text[offset..].find('{') {
        let start = offset + pos;
        let mut stream = Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) => {
                match decode_value(&value, options) {
                    Ok(action) => return vec![action],
                    Err(e) => debug!("Embedded JSON at offset {} is not an action: {}", start, e),
                }
                // Skip the whole value, nested objects included.
                offset = start + stream.byte_offset().max(1);
            }
            _ => offset = start + 1,
        }
    }

    Vec::new()
}
