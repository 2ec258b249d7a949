//! Chat model backends.

mod http;
pub mod openai;
pub mod prompt;
pub mod session;
mod tools;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::config::Settings;
use crate::models::ModelInfo;
use crate::parser::AssistantOutput;

pub use openai::OpenAiFactory;
pub use session::{ChatMessage, Conversation, Role};

/// One assistant turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub output: AssistantOutput,
    pub tokens: Option<u64>,
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(&self, messages: &[ChatMessage], temperature: f64) -> Result<Completion>;
}

/// Slack on top of the retry budget for building the request and parsing
/// the reply.
const TURN_OVERHEAD: Duration = Duration::from_secs(5);

/// How long a client should wait for one `chat` turn when every HTTP
/// attempt is limited to `attempt_timeout`.
pub fn turn_deadline(attempt_timeout: Duration) -> Duration {
    http::RetryPolicy::default()
        .budget(attempt_timeout)
        .saturating_add(TURN_OVERHEAD)
}

/// Creates a backend for a model; swapped out in tests.
pub trait BackendFactory: Send + Sync {
    fn create(&self, model: &ModelInfo, settings: &Settings) -> Result<Box<dyn ChatBackend>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_deadline_outlasts_all_retries() {
        let attempt = Duration::from_secs(60);
        assert!(turn_deadline(attempt) > attempt * 4);
    }
}
