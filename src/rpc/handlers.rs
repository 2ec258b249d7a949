//! Method handlers behind the RPC server.
//!
//! Application failures (no model, bad key, unknown model) are reported as
//! `{success: false, error}` results. Only malformed params and internal
//! faults become JSON-RPC error objects.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::protocol::{
    error_codes, methods, Ack, ApplyEditParams, ApplyEditResult, Capabilities, ChatParams,
    ChatResult, GetConfigParams, GetConfigResult, GetModelsResult, HistoryResult,
    InitializeParams, InitializeResult, SetConfigParams, SetModelParams, SetModelResult,
};
use crate::actions::{Action, EditType};
use crate::backend::prompt::{user_message, SYSTEM_PROMPT};
use crate::backend::{BackendFactory, ChatBackend, Conversation, Role};
use crate::config::ConfigStore;
use crate::executor::resolve_within;
use crate::models::ModelRegistry;
use crate::parser::{HybridParser, ParserOptions};
use crate::review::{format_summary, PendingEdit};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn code(&self) -> i64 {
        match self {
            HandlerError::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            HandlerError::InvalidParams(_) => error_codes::INVALID_PARAMS,
            HandlerError::Internal(_) => error_codes::INTERNAL_ERROR,
        }
    }
}

fn params<T: DeserializeOwned>(value: Value) -> Result<T, HandlerError> {
    let value = if value.is_null() { json!({}) } else { value };
    serde_json::from_value(value).map_err(|e| HandlerError::InvalidParams(e.to_string()))
}

fn to_value<T: Serialize>(result: T) -> Result<Value, HandlerError> {
    serde_json::to_value(result)
        .context("Failed to serialize result")
        .map_err(HandlerError::Internal)
}

/// The active model and its conversation.
struct ActiveModel {
    backend: Box<dyn ChatBackend>,
    conversation: Conversation,
}

/// Everything one server process holds between requests.
pub struct ServerState {
    config: ConfigStore,
    registry: ModelRegistry,
    factory: Arc<dyn BackendFactory>,
    active: Option<ActiveModel>,
    workspace_root: PathBuf,
    /// Model chosen on the command line; wins over `global.default_model`.
    default_model: Option<String>,
}

impl ServerState {
    pub fn new(config: ConfigStore, factory: Arc<dyn BackendFactory>, workspace_root: PathBuf) -> Self {
        let registry = ModelRegistry::with_config(config.get("models"));
        Self {
            config,
            registry,
            factory,
            active: None,
            workspace_root,
            default_model: None,
        }
    }

    pub fn with_default_model(mut self, model: Option<String>) -> Self {
        self.default_model = model;
        self
    }

    pub fn current_model(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.backend.model())
    }

    /// Run one method. `shutdown` is answered here; the server loop stops
    /// reading afterwards.
    pub async fn handle(&mut self, method: &str, raw: Value) -> Result<Value, HandlerError> {
        debug!("Handling {}", method);
        match method {
            methods::INITIALIZE => to_value(self.initialize(params(raw)?)),
            methods::CHAT => to_value(self.chat(params(raw)?).await),
            methods::GET_MODELS => to_value(self.get_models()),
            methods::SET_MODEL => to_value(self.set_model(params(raw)?)),
            methods::GET_CONFIG => to_value(self.get_config(params(raw)?)),
            methods::SET_CONFIG => to_value(self.set_config(params(raw)?)),
            methods::CLEAR_HISTORY => to_value(self.clear_history()),
            methods::GET_HISTORY => to_value(self.get_history()),
            methods::APPLY_EDIT => to_value(self.apply_edit(params(raw)?)),
            methods::SHUTDOWN => {
                info!("Server shutting down");
                to_value(Ack::ok())
            }
            other => Err(HandlerError::MethodNotFound(other.to_string())),
        }
    }

    /// Look up `name`, build its backend and start a fresh conversation.
    fn setup_model(&mut self, name: &str) -> Result<String, String> {
        let Some(model) = self.registry.get(name).cloned() else {
            warn!("Model not found: {}", name);
            return Err(format!("Model '{}' not found", name));
        };
        let settings = self.config.settings();
        let backend = self.factory.create(&model, &settings).map_err(|e| {
            error!("Failed to set up model {}: {:#}", model.name, e);
            format!("{:#}", e)
        })?;

        let conversation = Conversation::new(&model.name);
        let session_id = conversation.id().to_string();
        info!("Model set to: {} (session {})", model.name, session_id);
        self.active = Some(ActiveModel {
            backend,
            conversation,
        });
        Ok(session_id)
    }

    fn initialize(&mut self, params: InitializeParams) -> InitializeResult {
        let requested = params
            .model
            .filter(|name| !name.trim().is_empty())
            .or_else(|| self.default_model.clone());
        let configured = self.config.settings().default_model;

        let resolved = self
            .registry
            .resolve_with_fallback(requested.as_deref(), configured.as_deref());
        let error = match (resolved, requested) {
            (Some(model), _) => self.setup_model(&model.name).err(),
            (None, Some(name)) => Some(format!("Model '{}' not found", name)),
            (None, None) => None,
        };
        if let Some(error) = &error {
            warn!("Initialized without a usable model: {}", error);
        } else {
            info!("Server initialized");
        }

        InitializeResult {
            success: error.is_none(),
            ready: self.active.is_some(),
            capabilities: Capabilities::default(),
            model: self.current_model().map(str::to_string),
            error,
        }
    }

    async fn chat(&mut self, params: ChatParams) -> ChatResult {
        let settings = self.config.settings();
        let Some(active) = self.active.as_mut() else {
            return ChatResult::failed("No model selected");
        };
        if params.message.trim().is_empty() {
            return ChatResult::failed("Message is required");
        }

        let content = user_message(&params.message, &params.context);
        active.conversation.push(Role::User, content);
        let request = active.conversation.for_request(SYSTEM_PROMPT);
        let temperature = params.temperature.unwrap_or(settings.temperature);

        let completion = match active.backend.complete(&request, temperature).await {
            Ok(completion) => completion,
            Err(e) => {
                error!("Model API error: {:#}", e);
                active.conversation.pop();
                return ChatResult::failed(format!("API error: {:#}", e));
            }
        };

        let response = completion.output.text();
        active.conversation.push(Role::Assistant, response.clone());

        let parser = HybridParser::new(ParserOptions {
            auto_run_safe_commands: settings.auto_run_safe_commands,
        });
        let actions = parser.parse(&completion.output);
        let edits: Vec<PendingEdit> = actions
            .iter()
            .filter_map(|action| match action {
                Action::CodeEdit(edit) => Some(PendingEdit::from(edit.clone())),
                _ => None,
            })
            .collect();
        info!(
            "Chat response generated, tokens: {:?}, actions: {}, edits: {}",
            completion.tokens,
            actions.len(),
            edits.len()
        );

        let edits_summary =
            (!edits.is_empty()).then(|| format_summary(edits.iter().enumerate().map(|(i, e)| (i + 1, e))));
        ChatResult {
            success: true,
            response: Some(response),
            tokens: completion.tokens,
            cost: None,
            edits: (!edits.is_empty()).then_some(edits),
            edits_summary,
            actions: (!actions.is_empty()).then_some(actions),
            session_id: Some(active.conversation.id().to_string()),
            error: None,
        }
    }

    fn get_models(&self) -> GetModelsResult {
        GetModelsResult {
            success: true,
            models: self.registry.list().iter().map(|model| model.summary()).collect(),
            error: None,
        }
    }

    fn set_model(&mut self, params: SetModelParams) -> SetModelResult {
        let name = params.model.trim();
        if name.is_empty() {
            return SetModelResult {
                success: false,
                error: Some("Model name is required".to_string()),
                ..SetModelResult::default()
            };
        }
        match self.setup_model(name) {
            Ok(session_id) => SetModelResult {
                success: true,
                model: self.current_model().map(str::to_string),
                session_id: Some(session_id),
                error: None,
            },
            Err(error) => SetModelResult {
                success: false,
                error: Some(error),
                ..SetModelResult::default()
            },
        }
    }

    fn get_config(&self, params: GetConfigParams) -> GetConfigResult {
        match params.key.filter(|key| !key.is_empty()) {
            Some(key) => GetConfigResult {
                success: true,
                value: Some(self.config.get(&key).cloned().unwrap_or(Value::Null)),
                ..GetConfigResult::default()
            },
            None => GetConfigResult {
                success: true,
                config: Some(self.config.all().clone()),
                ..GetConfigResult::default()
            },
        }
    }

    fn set_config(&mut self, params: SetConfigParams) -> Ack {
        if params.key.trim().is_empty() {
            return Ack::failed("Key is required");
        }
        if let Err(e) = self.config.update(&params.key, params.value) {
            warn!("Failed to set {}: {:#}", params.key, e);
            return Ack::failed(format!("{:#}", e));
        }
        if params.key == "models" || params.key.starts_with("models.") {
            self.registry = ModelRegistry::with_config(self.config.get("models"));
        }
        Ack::ok()
    }

    fn clear_history(&mut self) -> Ack {
        if let Some(active) = self.active.as_mut() {
            active.conversation.clear();
            debug!(
                "Cleared history for session {} ({})",
                active.conversation.id(),
                active.conversation.model()
            );
        }
        Ack::ok()
    }

    fn get_history(&self) -> HistoryResult {
        match &self.active {
            Some(active) => HistoryResult {
                success: true,
                messages: active.conversation.messages().to_vec(),
                session_id: Some(active.conversation.id().to_string()),
                error: None,
            },
            None => HistoryResult {
                success: true,
                ..HistoryResult::default()
            },
        }
    }

    /// Validate an edit the editor is about to write itself.
    fn apply_edit(&self, params: ApplyEditParams) -> ApplyEditResult {
        let failed = |error: String| ApplyEditResult {
            success: false,
            error: Some(error),
            ..ApplyEditResult::default()
        };
        if params.file_path.trim().is_empty() {
            return failed("file_path is required".to_string());
        }
        let edit_type = match params.edit_type.as_deref().map(str::parse::<EditType>) {
            None => EditType::Modify,
            Some(Ok(edit_type)) => edit_type,
            Some(Err(other)) => return failed(format!("Unknown edit type: {}", other)),
        };
        if let Err(e) = resolve_within(&self.workspace_root, &params.file_path) {
            return failed(e.to_string());
        }

        info!("Edit validated for {} ({})", params.file_path, edit_type);
        ApplyEditResult {
            success: true,
            file_path: Some(params.file_path),
            edit_type: Some(edit_type.to_string()),
            error: None,
        }
    }
}
