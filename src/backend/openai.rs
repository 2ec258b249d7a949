//! OpenAI-compatible chat completions backend.
//!
//! Works with any provider exposing `POST {base}/chat/completions` with
//! bearer authentication (OpenAI, DeepSeek, Mistral, local gateways).

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

use super::http::{send_with_retry, RetryPolicy};
use super::session::ChatMessage;
use super::tools::tool_definitions;
use super::{BackendFactory, ChatBackend, Completion};
use crate::config::Settings;
use crate::models::ModelInfo;
use crate::parser::{AssistantOutput, ContentBlock};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

static HTTP_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

fn http_client() -> &'static reqwest::Client {
    HTTP_CLIENT.get_or_init(reqwest::Client::new)
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    max_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    #[serde(default)]
    id: String,
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    /// JSON-encoded argument object.
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: Option<u64>,
}

pub struct OpenAiBackend {
    model: String,
    endpoint: String,
    api_key: String,
    max_tokens: u64,
    native_tools: bool,
    timeout: Duration,
    retry: RetryPolicy,
}

impl OpenAiBackend {
    pub fn new(model: &ModelInfo, settings: &Settings) -> Result<Self> {
        let api_key = settings
            .api_key
            .clone()
            .or_else(|| model.api_key.clone())
            .filter(|key| !key.trim().is_empty())
            .context("API key not configured. Set global.api_key or AICODE_API_KEY.")?;
        let base_url = settings
            .api_url
            .as_deref()
            .or(model.api_url.as_deref())
            .unwrap_or(DEFAULT_BASE_URL);
        let endpoint = chat_endpoint(base_url)?;

        Ok(Self {
            model: model.name.clone(),
            endpoint,
            api_key,
            max_tokens: model.max_output_tokens,
            native_tools: settings.native_tools,
            timeout: settings.request_timeout,
            retry: RetryPolicy::default(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn chat_endpoint(base_url: &str) -> Result<String> {
    let base = url::Url::parse(base_url.trim())
        .with_context(|| format!("Invalid API URL: {}", base_url))?;
    Ok(format!(
        "{}/chat/completions",
        base.as_str().trim_end_matches('/')
    ))
}

/// Pull a readable message out of an error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .or_else(|| value.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

fn into_output(message: ResponseMessage) -> AssistantOutput {
    if message.tool_calls.is_empty() {
        return AssistantOutput::Text(message.content.unwrap_or_default());
    }

    let mut blocks = Vec::with_capacity(message.tool_calls.len() + 1);
    if let Some(text) = message.content.filter(|text| !text.trim().is_empty()) {
        blocks.push(ContentBlock::Text { text });
    }
    for call in message.tool_calls {
        let input = match serde_json::from_str::<Value>(&call.function.arguments) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    "Tool call '{}' has malformed arguments: {}",
                    call.function.name, e
                );
                Value::String(call.function.arguments)
            }
        };
        blocks.push(ContentBlock::ToolUse {
            id: call.id,
            name: call.function.name,
            input,
        });
    }
    AssistantOutput::Blocks(blocks)
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage], temperature: f64) -> Result<Completion> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature,
            max_tokens: self.max_tokens,
            tools: self.native_tools.then(tool_definitions),
        };
        debug!(
            "Sending {} message(s) to {} ({})",
            messages.len(),
            self.model,
            self.endpoint
        );

        let response = send_with_retry(self.retry, || {
            http_client()
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .timeout(self.timeout)
                .json(&request)
        })
        .await?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read model API response")?;
        if !status.is_success() {
            bail!("Model API error ({}): {}", status, error_message(&body));
        }

        let parsed: ChatResponse =
            serde_json::from_str(&body).context("Failed to parse model API response")?;
        let tokens = parsed.usage.and_then(|usage| usage.total_tokens);
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Model API returned no choices"))?;

        Ok(Completion {
            output: into_output(choice.message),
            tokens,
        })
    }
}

/// Builds [`OpenAiBackend`]s for every registered model.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAiFactory;

impl BackendFactory for OpenAiFactory {
    fn create(&self, model: &ModelInfo, settings: &Settings) -> Result<Box<dyn ChatBackend>> {
        Ok(Box::new(OpenAiBackend::new(model, settings)?))
    }
}
