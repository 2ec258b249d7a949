//! Decode errors for individual action fragments.
//!
//! These never escape [`super::HybridParser::parse`]; a failing fragment is
//! logged and dropped. They are public so each decoder can be tested.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("<{tag}> is missing required attribute `{attribute}`")]
    MissingAttribute {
        tag: &'static str,
        attribute: &'static str,
    },

    #[error("<{tag}> body for {path} has no fenced code block")]
    MissingFence { tag: &'static str, path: String },

    #[error("unknown edit type `{0}`")]
    UnknownEditType(String),

    #[error("command is empty")]
    EmptyCommand,

    #[error("file path is empty")]
    EmptyPath,

    #[error("unknown tool `{0}`")]
    UnknownTool(String),

    #[error("unknown action type `{0}`")]
    UnknownActionType(String),

    #[error("JSON value is not an action object")]
    NotAnAction,

    #[error("invalid input for `{tool}`: {source}")]
    InvalidInput {
        tool: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
